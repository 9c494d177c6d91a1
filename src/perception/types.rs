use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, AgentResult};

/// One captured device screen, PNG-encoded, with its pixel dimensions.
/// Owned by the loop iteration that produced it and dropped when that
/// iteration completes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl Frame {
    /// Wrap raw screencap output, decoding the image header for dimensions.
    pub fn from_png(png: Vec<u8>) -> AgentResult<Self> {
        use image::GenericImageView;

        let img = image::load_from_memory(&png)
            .map_err(|e| AgentError::Capture(format!("screenshot decode: {e}")))?;
        let (width, height) = img.dimensions();
        Ok(Self {
            png,
            width,
            height,
            captured_at: chrono::Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Text,
    Icon,
    #[serde(other)]
    Unknown,
}

/// One parsed on-screen region. Read-only once produced; the collection is
/// bounded to a single loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Id assigned by the perception service; survives confidence re-ordering.
    pub index: usize,
    pub kind: ElementKind,
    /// Normalized bounding box [xmin, ymin, xmax, ymax] in range 0.0–1.0.
    pub bbox: [f32; 4],
    pub content: String,
    pub interactive: bool,
    pub confidence: f32,
}

impl Element {
    /// Centre of the bounding box in physical pixel coordinates.
    pub fn center(&self, width: u32, height: u32) -> (i32, i32) {
        let cx = ((self.bbox[0] + self.bbox[2]) / 2.0 * width as f32).round() as i32;
        let cy = ((self.bbox[1] + self.bbox[3]) / 2.0 * height as f32).round() as i32;
        (cx, cy)
    }

    /// Normalized box area, the specificity tie-break for target matching.
    pub fn area(&self) -> f32 {
        let [x1, y1, x2, y2] = self.bbox;
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    /// Clamp the box into the unit square so every pixel coordinate derived
    /// from it stays inside the frame.
    pub fn clamp_bbox(&mut self) {
        for v in &mut self.bbox {
            *v = v.clamp(0.0, 1.0);
        }
    }
}
