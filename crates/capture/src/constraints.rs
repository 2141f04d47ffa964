/// An `ideal` value the device should aim for and a hard `max` it must not exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preference {
    pub ideal: u32,
    pub max: u32,
}

impl Preference {
    pub const fn new(ideal: u32, max: u32) -> Self {
        Self { ideal, max }
    }
}

/// What the core asks of a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: Preference,
    pub height: Preference,
    pub frame_rate: Option<Preference>,
}

impl CaptureConstraints {
    /// First attempt: VGA at 30 fps, never above 720p.
    pub const PREFERRED: Self = Self {
        width: Preference::new(640, 1280),
        height: Preference::new(480, 720),
        frame_rate: Some(Preference::new(30, 30)),
    };

    /// Used once after the device rejects [`Self::PREFERRED`].
    pub const FALLBACK: Self = Self {
        width: Preference::new(480, 640),
        height: Preference::new(360, 480),
        frame_rate: None,
    };

    /// Whether a negotiated resolution respects the hard ceilings.
    pub fn admits(&self, width: u32, height: u32) -> bool {
        width > 0 && height > 0 && width <= self.width.max && height <= self.height.max
    }
}

/// Which constraint set an acquired source was negotiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintTier {
    Preferred,
    Fallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_more_permissive_than_preferred() {
        let preferred = CaptureConstraints::PREFERRED;
        let fallback = CaptureConstraints::FALLBACK;
        assert!(fallback.width.ideal < preferred.width.ideal);
        assert!(fallback.height.ideal < preferred.height.ideal);
        assert!(fallback.frame_rate.is_none());
    }

    #[test]
    fn admits_respects_ceilings() {
        let constraints = CaptureConstraints::PREFERRED;
        assert!(constraints.admits(640, 480));
        assert!(constraints.admits(1280, 720));
        assert!(!constraints.admits(1920, 1080));
        assert!(!constraints.admits(0, 480));
    }
}
