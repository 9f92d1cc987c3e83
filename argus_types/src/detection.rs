use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Layout of the leading timestamp field of every log line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub const CLASS_VEHICLE: u32 = 0;
pub const CLASS_BICYCLE: u32 = 1;
pub const CLASS_PERSON: u32 = 2;
pub const CLASS_ROADSIGN: u32 = 3;

pub fn class_label(class_id: u32) -> Option<&'static str> {
    match class_id {
        CLASS_VEHICLE => Some("vehicle"),
        CLASS_BICYCLE => Some("bicycle"),
        CLASS_PERSON => Some("person"),
        CLASS_ROADSIGN => Some("roadsign"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// One detected object in one frame, as it appears in the shared log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub timestamp: DateTime<Local>,
    pub frame_number: u64,
    pub class_id: u32,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl DetectionRecord {
    /// Log line without the trailing newline.
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DetectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Frame:{}, ClassID:{}, Confidence:{:.4}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.frame_number,
            self.class_id,
            self.confidence
        )?;
        if let Some(b) = &self.bounding_box {
            write!(
                f,
                ", BBox:({},{},{},{})",
                b.left, b.top, b.width, b.height
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("line has {0} fields, expected 4 or 5")]
    FieldCount(usize),
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error("field {field} must start with {prefix:?}")]
    Prefix {
        field: &'static str,
        prefix: &'static str,
    },
    #[error("invalid {field} value {value:?}")]
    Value { field: &'static str, value: String },
}

impl FromStr for DetectionRecord {
    type Err = LineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        // The bbox field contains commas of its own, so split it off first.
        let (head, bbox) = match line.split_once(", BBox:") {
            Some((head, rest)) => (head, Some(rest)),
            None => (line, None),
        };

        let fields: Vec<&str> = head.split(", ").collect();
        if fields.len() != 4 {
            return Err(LineError::FieldCount(
                fields.len() + usize::from(bbox.is_some()),
            ));
        }

        let naive = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
            .map_err(|_| LineError::Timestamp(fields[0].to_string()))?;
        let timestamp = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| LineError::Timestamp(fields[0].to_string()))?;

        let frame_number = parse_field(fields[1], "frame", "Frame:")?;
        let class_id = parse_field(fields[2], "class_id", "ClassID:")?;
        let confidence = parse_confidence(fields[3])?;
        let bounding_box = bbox.map(parse_bbox).transpose()?;

        Ok(Self {
            timestamp,
            frame_number,
            class_id,
            confidence,
            bounding_box,
        })
    }
}

fn parse_field<T: FromStr>(
    raw: &str,
    field: &'static str,
    prefix: &'static str,
) -> Result<T, LineError> {
    let value = raw
        .strip_prefix(prefix)
        .ok_or(LineError::Prefix { field, prefix })?;
    value.parse::<T>().map_err(|_| LineError::Value {
        field,
        value: value.to_string(),
    })
}

fn parse_confidence(raw: &str) -> Result<f32, LineError> {
    let prefix = "Confidence:";
    let value = raw.strip_prefix(prefix).ok_or(LineError::Prefix {
        field: "confidence",
        prefix,
    })?;
    // Four fixed decimals is part of the format, not just presentation.
    let decimals = value.split_once('.').map(|(_, d)| d.len());
    if decimals != Some(4) {
        return Err(LineError::Value {
            field: "confidence",
            value: value.to_string(),
        });
    }
    value.parse::<f32>().map_err(|_| LineError::Value {
        field: "confidence",
        value: value.to_string(),
    })
}

fn parse_bbox(raw: &str) -> Result<BoundingBox, LineError> {
    let bad = || LineError::Value {
        field: "bbox",
        value: raw.to_string(),
    };
    let inner = raw
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(bad)?;
    let parts: Vec<u32> = inner
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad())?;
    match parts.as_slice() {
        [left, top, width, height] => Ok(BoundingBox {
            left: *left,
            top: *top,
            width: *width,
            height: *height,
        }),
        _ => Err(bad()),
    }
}
