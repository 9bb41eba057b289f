//! Classification of SteamCMD console output.
//!
//! SteamCMD has no machine-readable mode, so everything the fetch workflow
//! knows about a run comes from scraping these lines.

use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Substrings (lowercase) of the lines SteamCMD prints when it blocks on stdin for a code.
const GUARD_PROMPT_MARKERS: &[&str] = &["steam guard code:", "two-factor code:"];

/// What a single line of tool output means to the workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    GuardPrompt,
    DownloadComplete(PathBuf),
    Progress(u8),
    Noise,
    Info,
}

fn noise_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\[\s*\d+%\]",
            r"\(\d+.*(?:von|of).*\)",
            r"Redirecting stderr to",
            r"Logging directory:",
            r"UpdateUI: skip show logo",
            r"^\s*$",
            r"KeyValues Error",
            r"src/tier1/KeyValues.cpp",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

fn completion_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"Depot download complete : "([^"]+)""#).expect("static regex")
    })
}

fn progress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[\s*(\d+)%\]").expect("static regex"))
}

pub fn classify(line: &str) -> LineKind {
    if is_guard_prompt(line) {
        return LineKind::GuardPrompt;
    }
    if let Some(path) = parse_download_complete(line) {
        return LineKind::DownloadComplete(path);
    }
    if let Some(pct) = parse_progress(line) {
        return LineKind::Progress(pct);
    }
    if is_noise(line) {
        LineKind::Noise
    } else {
        LineKind::Info
    }
}

pub fn is_guard_prompt(line: &str) -> bool {
    let l = line.to_lowercase();
    GUARD_PROMPT_MARKERS.iter().any(|m| l.contains(m))
}

pub fn is_noise(line: &str) -> bool {
    noise_patterns().iter().any(|re| re.is_match(line))
}

/// Extracts the scratch path from `Depot download complete : "<path>"`.
///
/// Runs of backslashes become a single `/`, which every platform accepts.
pub fn parse_download_complete(line: &str) -> Option<PathBuf> {
    let caps = completion_pattern().captures(line)?;
    let raw = caps.get(1)?.as_str();
    Some(PathBuf::from(normalize_separators(raw)))
}

fn normalize_separators(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_backslash = false;
    for c in raw.chars() {
        if c == '\\' {
            if !prev_backslash {
                out.push('/');
            }
            prev_backslash = true;
        } else {
            out.push(c);
            prev_backslash = false;
        }
    }
    out
}

/// SteamCMD self-update progress, e.g. `[ 42%] Downloading update (1,234 of 5,678 KB)...`.
pub fn parse_progress(line: &str) -> Option<u8> {
    let caps = progress_pattern().captures(line)?;
    let pct: u32 = caps.get(1)?.as_str().parse().ok()?;
    Some(pct.min(100) as u8)
}

/// Splits a raw byte stream into lines.
///
/// SteamCMD prints its code prompt without a trailing newline and then blocks,
/// so a pending partial line that already contains a prompt marker is released
/// immediately instead of waiting for a newline that never comes.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\n' {
                lines.push(self.take());
            } else if b != b'\r' {
                self.pending.push(b);
            }
        }
        if !self.pending.is_empty() && is_guard_prompt(&String::from_utf8_lossy(&self.pending)) {
            lines.push(self.take());
        }
        lines
    }

    /// Flushes whatever is left once the stream hits EOF.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    /// Colour codes are dropped; the matchers only see plain text.
    fn take(&mut self) -> String {
        let raw = std::mem::take(&mut self.pending);
        console::strip_ansi_codes(&String::from_utf8_lossy(&raw)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_guard_prompts() {
        assert_eq!(classify("Steam Guard code:"), LineKind::GuardPrompt);
        assert_eq!(classify("Two-factor code:"), LineKind::GuardPrompt);
        assert_eq!(
            classify("Please check your email for the message from Steam, and enter the Steam Guard code from that message."),
            LineKind::Info
        );
    }

    #[test]
    fn captures_completion_path_with_windows_separators() {
        let line = r#"Depot download complete : "C:\\steamcmd\\steamapps\\content\\app_1206560\\depot_1206561" (412 files, manifest 123)"#;
        assert_eq!(
            classify(line),
            LineKind::DownloadComplete(PathBuf::from(
                "C:/steamcmd/steamapps/content/app_1206560/depot_1206561"
            ))
        );

        let line = r#"Depot download complete : "/home/u/Steam/steamapps/content/app_1206560/depot_1206562" (3 files, manifest 9)"#;
        assert_eq!(
            parse_download_complete(line),
            Some(PathBuf::from(
                "/home/u/Steam/steamapps/content/app_1206560/depot_1206562"
            ))
        );
    }

    #[test]
    fn filters_known_noise() {
        for line in [
            "",
            "   ",
            "Redirecting stderr to '/home/u/Steam/logs/stderr.txt'",
            "Logging directory: '/home/u/Steam/logs'",
            "UpdateUI: skip show logo",
            "KeyValues Error: RecursiveLoadFromBuffer:  got EOF instead of keyname",
            "src/tier1/KeyValues.cpp (2162) : m_pExpressionGetSymbolProc",
            " (1234 of 5678 KB)",
            " (12 von 50)",
        ] {
            assert!(is_noise(line), "expected noise: {line:?}");
            assert_eq!(classify(line), LineKind::Noise, "{line:?}");
        }

        for line in [
            "Logging in user 'bob' [U:1:0] to Steam Public...OK",
            "Waiting for client config...OK",
            "FAILED (Invalid Password)",
        ] {
            assert_eq!(classify(line), LineKind::Info, "{line:?}");
        }
    }

    #[test]
    fn progress_markers_become_progress() {
        assert_eq!(
            classify("[ 42%] Downloading update (1,024 of 2,048 KB)..."),
            LineKind::Progress(42)
        );
        assert_eq!(parse_progress("[100%] Download Complete."), Some(100));
        assert_eq!(parse_progress("no progress here"), None);
    }

    #[test]
    fn splitter_drops_colour_codes_and_carriage_returns() {
        let mut s = LineSplitter::new();
        assert_eq!(
            s.push(b"\x1b[0m\x1b[1;33mWarning: Steam is slow\x1b[0m\r\n"),
            vec!["Warning: Steam is slow"]
        );
        assert_eq!(
            s.push(b"\x1b[1mSteam Guard code:\x1b[0m"),
            vec!["Steam Guard code:"]
        );
    }

    #[test]
    fn splitter_joins_chunks_into_lines() {
        let mut s = LineSplitter::new();
        assert!(s.push(b"Loading Steam API").is_empty());
        assert_eq!(s.push(b"...OK\r\nConnecting"), vec!["Loading Steam API...OK"]);
        assert_eq!(s.push(b"\n"), vec!["Connecting"]);
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn splitter_releases_prompt_without_newline() {
        let mut s = LineSplitter::new();
        assert_eq!(
            s.push(b"Logging in user 'bob'\nSteam Guard code:"),
            vec!["Logging in user 'bob'", "Steam Guard code:"]
        );
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn splitter_flushes_tail_at_eof() {
        let mut s = LineSplitter::new();
        assert!(s.push(b"Unloading Steam API...OK").is_empty());
        assert_eq!(s.finish().as_deref(), Some("Unloading Steam API...OK"));
    }
}
