use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            code: code.to_string(),
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

pub fn render_diagnostic(path: &str, diagnostic: &Diagnostic) -> String {
    match diagnostic.line {
        Some(line) => format!(
            "error[{}] {}:{} {}",
            diagnostic.code, path, line, diagnostic.message
        ),
        None => format!("error[{}] {} {}", diagnostic.code, path, diagnostic.message),
    }
}
