//! Text recognition via the Tesseract CLI.

use anyhow::Result;
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;

use crate::config::RecognitionConfig;
use crate::error::ExtractError;
use crate::log;
use crate::models::Rectangle;

/// Legacy language codes accepted in config files, mapped to Tesseract names.
const LANGUAGE_ALIASES: [(&str, &str); 4] = [
    ("ch", "chi_sim"),
    ("chi", "chi_sim"),
    ("zh", "chi_sim"),
    ("en", "eng"),
];

/// Tried in order when the requested language pack is not installed.
const LANGUAGE_FALLBACKS: [&str; 2] = ["chi_sim", "eng"];

/// A recognized text line with its position in the source image.
#[derive(Debug, Clone)]
pub struct RecognizedLine {
    pub text: String,
    /// Normalized to 0.0-1.0.
    pub confidence: f32,
    pub bounds: Rectangle,
}

/// Recognition backend. Tests substitute a scripted implementation.
pub trait RecognitionEngine {
    fn recognize(&self, img: &GrayImage) -> Result<Vec<RecognizedLine>>;
    fn language(&self) -> &str;
}

pub struct TesseractEngine {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
    language: String,
}

impl TesseractEngine {
    pub fn new(config: &RecognitionConfig) -> Result<Self> {
        let executable = find_executable(config.engine_path.as_deref())?;
        let tessdata = find_tessdata(config.tessdata_path.as_deref());
        let available = available_languages(&executable, tessdata.as_deref());
        let language = resolve_language(&config.language, available.as_deref());
        log(&format!(
            "Recognition engine: {} (language: {})",
            executable.display(),
            language
        ));
        Ok(Self {
            executable,
            tessdata,
            language,
        })
    }
}

impl RecognitionEngine for TesseractEngine {
    fn recognize(&self, img: &GrayImage) -> Result<Vec<RecognizedLine>> {
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())?;

        // Tesseract appends .tsv to the output base itself.
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut cmd = Command::new(&self.executable);
        cmd.arg(temp_input.path()).arg(&output_base);
        if let Some(tessdata) = &self.tessdata {
            cmd.arg("--tessdata-dir").arg(tessdata);
        }
        let output = cmd
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg("6")
            .arg("tsv")
            .output()
            .map_err(|e| {
                ExtractError::EngineUnavailable(format!(
                    "failed to launch {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::EngineUnavailable(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            ))
            .into());
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path).map_err(|e| {
            ExtractError::EngineUnavailable(format!("failed to read tesseract output: {}", e))
        })?;
        let _ = std::fs::remove_file(&tsv_path);

        Ok(parse_tsv(&tsv_content))
    }

    fn language(&self) -> &str {
        &self.language
    }
}

/// Directory where a private engine copy may live.
fn engine_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wechat-extractor")
        .join("tesseract")
}

/// Finds the Tesseract executable: explicit config path, then a private
/// copy, then PATH, then common install locations.
fn find_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ExtractError::EngineUnavailable(format!(
            "configured engine path does not exist: {}",
            path.display()
        ))
        .into());
    }

    let exe_name = if cfg!(windows) {
        "tesseract.exe"
    } else {
        "tesseract"
    };
    let local = engine_dir().join(exe_name);
    if local.exists() {
        return Ok(local);
    }

    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    let common_paths = [
        r"C:\Program Files\Tesseract-OCR\tesseract.exe",
        r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    ];
    for path in &common_paths {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(ExtractError::EngineUnavailable(format!(
        "Tesseract not found. Please install Tesseract-OCR:\n\
         1. Download from: https://github.com/UB-Mannheim/tesseract/releases\n\
         2. Run the installer (choose to add to PATH)\n\
         3. Or copy the executable to: {}\n\
         4. Restart this application after installation",
        engine_dir().display()
    ))
    .into())
}

/// Finds a tessdata directory, or None to let Tesseract use its default.
fn find_tessdata(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_dir() {
            return Some(path.to_path_buf());
        }
        log(&format!(
            "Configured tessdata path does not exist: {}",
            path.display()
        ));
    }

    let local = engine_dir().join("tessdata");
    if local.is_dir() {
        return Some(local);
    }

    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let p = PathBuf::from(&prefix);
        if p.is_dir() {
            return Some(p);
        }
        let nested = p.join("tessdata");
        if nested.is_dir() {
            return Some(nested);
        }
    }

    None
}

/// Queries the engine for installed language packs. None when the probe
/// itself fails, in which case the requested language is used untested.
fn available_languages(executable: &Path, tessdata: Option<&Path>) -> Option<Vec<String>> {
    let mut cmd = Command::new(executable);
    cmd.arg("--list-langs");
    if let Some(dir) = tessdata {
        cmd.arg("--tessdata-dir").arg(dir);
    }
    let output = cmd.output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("List of"))
            .map(str::to_string)
            .collect(),
    )
}

/// Maps legacy aliases to Tesseract names and falls back through installed
/// packs when the requested one is missing.
fn resolve_language(requested: &str, available: Option<&[String]>) -> String {
    let lower = requested.to_lowercase();
    let canonical = LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, name)| *name)
        .unwrap_or(requested);

    let Some(langs) = available else {
        return canonical.to_string();
    };
    if langs.iter().any(|l| l == canonical) {
        return canonical.to_string();
    }
    for fallback in LANGUAGE_FALLBACKS {
        if langs.iter().any(|l| l == fallback) {
            log(&format!(
                "Language pack {} not installed, falling back to {}",
                canonical, fallback
            ));
            return fallback.to_string();
        }
    }
    canonical.to_string()
}

struct LineAccumulator {
    words: Vec<String>,
    conf_sum: f32,
    word_count: usize,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl LineAccumulator {
    fn new() -> Self {
        Self {
            words: Vec::new(),
            conf_sum: 0.0,
            word_count: 0,
            left: i32::MAX,
            top: i32::MAX,
            right: i32::MIN,
            bottom: i32::MIN,
        }
    }

    fn push(&mut self, text: &str, conf: f32, left: i32, top: i32, width: i32, height: i32) {
        self.words.push(text.to_string());
        self.conf_sum += conf;
        self.word_count += 1;
        self.left = self.left.min(left);
        self.top = self.top.min(top);
        self.right = self.right.max(left + width);
        self.bottom = self.bottom.max(top + height);
    }

    fn flush(&mut self, lines: &mut Vec<RecognizedLine>) {
        if self.words.is_empty() {
            return;
        }
        let confidence = (self.conf_sum / self.word_count as f32 / 100.0).clamp(0.0, 1.0);
        lines.push(RecognizedLine {
            text: join_words(&self.words),
            confidence,
            bounds: Rectangle::new(
                self.left,
                self.top,
                (self.right - self.left).max(0) as u32,
                (self.bottom - self.top).max(0) as u32,
            ),
        });
        *self = Self::new();
    }
}

/// Joins TSV words, inserting a space only between ASCII-alphanumeric
/// neighbours. Tesseract splits CJK lines into character clusters and
/// joining those with spaces would corrupt the text.
fn join_words(words: &[String]) -> String {
    let mut joined = String::new();
    for word in words {
        if !joined.is_empty() {
            let prev_alnum = joined.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
            let next_alnum = word.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
            if prev_alnum && next_alnum {
                joined.push(' ');
            }
        }
        joined.push_str(word);
    }
    joined
}

/// Parses Tesseract TSV output into positioned lines. Word rows (level 5)
/// are grouped by their block/paragraph/line numbers.
fn parse_tsv(tsv: &str) -> Vec<RecognizedLine> {
    let mut lines = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut accumulator = LineAccumulator::new();

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Fields: level, page_num, block_num, par_num, line_num, word_num,
        //         left, top, width, height, conf, text
        let level: i32 = fields[0].parse().unwrap_or(-1);
        if level != 5 {
            continue;
        }
        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }
        let conf: f32 = fields[10].parse().unwrap_or(-1.0);
        if conf < 0.0 {
            continue;
        }
        let block: i32 = fields[2].parse().unwrap_or(-1);
        let par: i32 = fields[3].parse().unwrap_or(-1);
        let line: i32 = fields[4].parse().unwrap_or(-1);
        let left: i32 = fields[6].parse().unwrap_or(0);
        let top: i32 = fields[7].parse().unwrap_or(0);
        let width: i32 = fields[8].parse().unwrap_or(0);
        let height: i32 = fields[9].parse().unwrap_or(0);

        let key = (block, par, line);
        if current_key.is_some() && current_key != Some(key) {
            accumulator.flush(&mut lines);
        }
        current_key = Some(key);
        accumulator.push(text, conf, left, top, width, height);
    }
    accumulator.flush(&mut lines);
    lines
}
