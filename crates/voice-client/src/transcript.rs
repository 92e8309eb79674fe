/// Prefix of lines spoken by the assistant.
pub const ASSISTANT_PREFIX: &str = "AI: ";
/// Prefix of lines spoken by the user.
pub const USER_PREFIX: &str = "You: ";

/// Append-only conversation log with two authors told apart by line prefix.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    /// Extends the latest assistant line, starting one if the last line is not the assistant's.
    pub fn append_assistant(&mut self, delta: &str) {
        match self.lines.last_mut() {
            Some(line) if line.starts_with(ASSISTANT_PREFIX) => line.push_str(delta),
            _ => self.lines.push(format!("{ASSISTANT_PREFIX}{delta}")),
        }
    }

    /// Records a completed user utterance on a new line.
    pub fn push_user(&mut self, text: &str) {
        self.lines.push(format!("{USER_PREFIX}{}", text.trim()));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}
