use async_trait::async_trait;
use console::Term;

/// Asks a human for a Steam Guard / two-factor code.
///
/// `None` means the human submitted nothing (for example because the login was
/// approved in the Steam mobile app); the workflow then sends a blank line.
/// Implementations may block for as long as they like; the caller bounds the
/// wait with a timeout and a cancellation token.
#[async_trait]
pub trait GuardCodePrompt: Send + Sync {
    async fn request_code(&self, attempt: u32) -> Option<String>;
}

/// Reads the code from the controlling terminal.
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    term: Term,
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::with_term(Term::stderr())
    }

    pub fn with_term(term: Term) -> Self {
        Self { term }
    }
}

#[async_trait]
impl GuardCodePrompt for TerminalPrompt {
    async fn request_code(&self, attempt: u32) -> Option<String> {
        if !self.term.is_term() {
            log::warn!("Steam Guard code requested but no terminal is attached; sending a blank line");
            return None;
        }

        let term = self.term.clone();
        let res = tokio::task::spawn_blocking(move || {
            let label = if attempt > 1 {
                "Steam Guard code rejected. Enter a new code (just press enter if approved in-app): "
            } else {
                "Enter Steam Guard code (just press enter if approved in-app): "
            };
            term.write_str(label)?;
            term.read_line()
        })
        .await;

        match res {
            Ok(Ok(line)) => {
                let code = line.trim().to_string();
                if code.is_empty() {
                    None
                } else {
                    Some(code)
                }
            }
            Ok(Err(e)) => {
                log::warn!("failed to read Steam Guard code: {e}");
                None
            }
            Err(e) => {
                log::warn!("Steam Guard prompt task failed: {e}");
                None
            }
        }
    }
}
