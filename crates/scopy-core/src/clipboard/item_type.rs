use serde::{Deserialize, Serialize};

/// Tagged variant of the kind of content a clipboard entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardItemType {
    Text,
    Rtf,
    Html,
    Image,
    File,
    Other,
}

impl ClipboardItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Rtf => "rtf",
            Self::Html => "html",
            Self::Image => "image",
            Self::File => "file",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "rtf" => Some(Self::Rtf),
            "html" => Some(Self::Html),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClipboardItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
