use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SubburnError;

/// Output frame size of the burn stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    /// Keep the source frame size
    #[default]
    Original,
    /// Scale to fit and pad to exactly this size
    Fixed { width: u32, height: u32 },
}

impl Resolution {
    pub const ORIGINAL: &'static str = "original";
}

impl FromStr for Resolution {
    type Err = SubburnError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case(Self::ORIGINAL) {
            return Ok(Resolution::Original);
        }

        let invalid = || {
            SubburnError::InvalidRequest(format!(
                "Invalid resolution '{}'. Use 'original' or WIDTHxHEIGHT",
                value
            ))
        };
        let (width, height) = value.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = width.parse::<u32>().map_err(|_| invalid())?;
        let height = height.parse::<u32>().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }

        Ok(Resolution::Fixed { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Original => f.write_str(Self::ORIGINAL),
            Resolution::Fixed { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = SubburnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution() {
        assert_eq!("original".parse::<Resolution>().unwrap(), Resolution::Original);
        assert_eq!(
            "1280x720".parse::<Resolution>().unwrap(),
            Resolution::Fixed { width: 1280, height: 720 }
        );
        assert!("1280".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());
        assert!("widexhigh".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_serde_uses_string_form() {
        let json = serde_json::to_string(&Resolution::Fixed { width: 640, height: 360 }).unwrap();
        assert_eq!(json, "\"640x360\"");
        let back: Resolution = serde_json::from_str("\"original\"").unwrap();
        assert_eq!(back, Resolution::Original);
    }
}
