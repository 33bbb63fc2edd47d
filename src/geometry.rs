//! Small geometry value types shared across the platform layer

/// Surface-local logical position (protocol fixed-point converted to f64)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Two-dimensional delta (scroll, gesture)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
}

impl Vector {
    pub const ZERO: Vector = Vector { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Builds a size from protocol integers; anything non-positive is "no size"
    pub fn from_protocol(width: i32, height: i32) -> Option<Self> {
        if width > 0 && height > 0 {
            Some(Self::new(width as u32, height as u32))
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn scaled(&self, fx: f64, fy: f64) -> Self {
        Self::new(
            (self.width as f64 * fx).round() as u32,
            (self.height as f64 * fy).round() as u32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> PixelPoint {
        PixelPoint::new(self.x, self.y)
    }

    pub fn size(&self) -> PixelSize {
        PixelSize::new(self.width, self.height)
    }

    pub fn contains(&self, point: PixelPoint) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        point.x >= self.x
            && point.y >= self.y
            && (point.x as i64) < right
            && (point.y as i64) < bottom
    }

    /// Area of the intersection with `other`, zero when disjoint
    pub fn overlap_area(&self, other: &PixelRect) -> u64 {
        let left = self.x.max(other.x) as i64;
        let top = self.y.max(other.y) as i64;
        let right = (self.x as i64 + self.width as i64).min(other.x as i64 + other.width as i64);
        let bottom =
            (self.y as i64 + self.height as i64).min(other.y as i64 + other.height as i64);
        if right <= left || bottom <= top {
            0
        } else {
            ((right - left) * (bottom - top)) as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_sizes() {
        assert_eq!(PixelSize::from_protocol(0, 0), None);
        assert_eq!(PixelSize::from_protocol(-5, 10), None);
        assert_eq!(
            PixelSize::from_protocol(640, 480),
            Some(PixelSize::new(640, 480))
        );
    }

    #[test]
    fn test_rect_contains_and_overlap() {
        let rect = PixelRect::new(1920, 0, 1280, 1024);
        assert!(rect.contains(PixelPoint::new(1920, 0)));
        assert!(!rect.contains(PixelPoint::new(3200, 10)));

        let other = PixelRect::new(1800, 100, 200, 200);
        assert_eq!(rect.overlap_area(&other), 80 * 200);
        assert_eq!(rect.overlap_area(&PixelRect::new(0, 0, 10, 10)), 0);
    }
}
