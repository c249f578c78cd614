//! Pixel-space geometry for detected content regions.
//!
//! All boxes live in raster coordinates (origin top-left, y grows downward)
//! and are kept clipped to the page they were detected on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates.
///
/// Constructors refuse zero-sized boxes, so every `BoundingBox` that exists
/// has `width > 0` and `height > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Build a box from inclusive top-left and exclusive bottom-right corners.
    pub fn from_corners(x1: u32, y1: u32, x2: u32, y2: u32) -> Option<Self> {
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Area shared with `other`, zero when the boxes are disjoint or only touch.
    pub fn intersection_area(&self, other: &BoundingBox) -> u64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x1 < x2 && y1 < y2 {
            (x2 - x1) as u64 * (y2 - y1) as u64
        } else {
            0
        }
    }

    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
            width: self.right().max(other.right()) - self.x.min(other.x),
            height: self.bottom().max(other.bottom()) - self.y.min(other.y),
        }
    }

    /// Clip to `[0, page_width) x [0, page_height)`, or `None` if nothing remains.
    pub fn clipped(&self, page_width: u32, page_height: u32) -> Option<BoundingBox> {
        let x2 = self.right().min(page_width);
        let y2 = self.bottom().min(page_height);
        Self::from_corners(self.x, self.y, x2, y2)
    }

    /// Grow by `padding` pixels on every side, then clip to the page.
    pub fn padded(&self, padding: u32, page_width: u32, page_height: u32) -> Option<BoundingBox> {
        let x1 = self.x.saturating_sub(padding);
        let y1 = self.y.saturating_sub(padding);
        let x2 = self.right().saturating_add(padding).min(page_width);
        let y2 = self.bottom().saturating_add(padding).min(page_height);
        Self::from_corners(x1, y1, x2, y2)
    }

    /// Whether the box lies entirely inside a page of the given size.
    pub fn fits_within(&self, page_width: u32, page_height: u32) -> bool {
        self.right() <= page_width && self.bottom() <= page_height
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.x,
            self.y,
            self.right(),
            self.bottom()
        )
    }
}

/// Kind of visual content a region holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Diagram,
    Table,
    Equation,
    /// Margin-trimmed page interior used when no detector fired.
    Representative,
}

impl ContentType {
    /// Label used in stored names.
    pub fn label(&self) -> &'static str {
        match self {
            ContentType::Diagram => "diagram",
            ContentType::Table => "table",
            ContentType::Equation => "equation",
            ContentType::Representative => "content",
        }
    }
}

/// An unverified box proposed by one detector pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRegion {
    pub bounds: BoundingBox,
    pub content_type: ContentType,
    pub page: u32,
}

impl CandidateRegion {
    pub fn new(bounds: BoundingBox, content_type: ContentType, page: u32) -> Self {
        Self {
            bounds,
            content_type,
            page,
        }
    }
}
