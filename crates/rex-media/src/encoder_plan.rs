//! Encoder selection and hardware-acceleration fallback plans.

use serde::{Deserialize, Serialize};
use std::fmt;

use rex_models::encoding::SOFTWARE_CODEC;

/// Why a config is itself a degraded choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackNote {
    /// Hardware was requested but no accelerator was detected
    HwaccelUnavailable,
    /// Hardware was detected but the hardware attempt may have failed
    HwaccelHandshakeFailed,
}

impl FallbackNote {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackNote::HwaccelUnavailable => "HWACCEL_UNAVAILABLE",
            FallbackNote::HwaccelHandshakeFailed => "HWACCEL_HANDSHAKE_FAILED",
        }
    }
}

impl fmt::Display for FallbackNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware accelerators we know how to drive, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accelerator {
    Cuda,
    Vaapi,
    Qsv,
}

impl Accelerator {
    pub const PRIORITY: [Accelerator; 3] = [Accelerator::Cuda, Accelerator::Vaapi, Accelerator::Qsv];

    /// `-hwaccel` method name.
    pub fn hwaccel(&self) -> &'static str {
        match self {
            Accelerator::Cuda => "cuda",
            Accelerator::Vaapi => "vaapi",
            Accelerator::Qsv => "qsv",
        }
    }

    /// FFmpeg H.264 encoder for this accelerator.
    pub fn codec(&self) -> &'static str {
        match self {
            Accelerator::Cuda => "h264_nvenc",
            Accelerator::Vaapi => "h264_vaapi",
            Accelerator::Qsv => "h264_qsv",
        }
    }

    /// Whether `id` (an encoder name or hwaccel method) names this accelerator.
    pub fn matches(&self, id: &str) -> bool {
        let id = id.trim();
        id.eq_ignore_ascii_case(self.codec()) || id.eq_ignore_ascii_case(self.hwaccel())
    }

    /// Highest priority accelerator present in `available`.
    pub fn pick(available: &[String]) -> Option<Accelerator> {
        Self::PRIORITY
            .into_iter()
            .find(|accel| available.iter().any(|id| accel.matches(id)))
    }
}

/// One concrete attempt at encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Flags placed before every other encoder argument
    pub pre_args: Vec<String>,
    /// Value for `-c:v`
    pub codec: String,
    /// Set when this config is a degraded choice
    pub fallback_note: Option<FallbackNote>,
}

impl EncoderConfig {
    /// Plain software encoder.
    pub fn software() -> Self {
        Self {
            pre_args: Vec::new(),
            codec: SOFTWARE_CODEC.to_string(),
            fallback_note: None,
        }
    }

    /// Hardware encoder for an accelerator.
    pub fn hardware(accel: Accelerator) -> Self {
        Self {
            pre_args: vec!["-hwaccel".to_string(), accel.hwaccel().to_string()],
            codec: accel.codec().to_string(),
            fallback_note: None,
        }
    }

    pub fn with_note(mut self, note: FallbackNote) -> Self {
        self.fallback_note = Some(note);
        self
    }
}

/// Ordered encoder attempts, tried left to right until one succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderPlan(Vec<EncoderConfig>);

impl EncoderPlan {
    /// Build the plan for a job.
    ///
    /// A detected accelerator gets a software safety net because detection
    /// does not guarantee a working encode; a known-absent one gets no
    /// hardware attempt at all.
    pub fn resolve(prefer_hw: bool, available: &[String]) -> Self {
        if !prefer_hw {
            return Self(vec![EncoderConfig::software()]);
        }

        match Accelerator::pick(available) {
            Some(accel) => Self(vec![
                EncoderConfig::hardware(accel),
                EncoderConfig::software().with_note(FallbackNote::HwaccelHandshakeFailed),
            ]),
            None => Self(vec![
                EncoderConfig::software().with_note(FallbackNote::HwaccelUnavailable)
            ]),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EncoderConfig> {
        self.0.iter()
    }

    pub fn configs(&self) -> &[EncoderConfig] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a EncoderPlan {
    type Item = &'a EncoderConfig;
    type IntoIter = std::slice::Iter<'a, EncoderConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_preference_is_plain_software() {
        for available in [ids(&[]), ids(&["h264_nvenc"]), ids(&["cuda", "qsv"])] {
            let plan = EncoderPlan::resolve(false, &available);
            assert_eq!(plan.len(), 1);
            assert_eq!(plan.configs()[0], EncoderConfig::software());
            assert!(plan.configs()[0].pre_args.is_empty());
        }
    }

    #[test]
    fn test_detected_accelerator_gets_software_safety_net() {
        let plan = EncoderPlan::resolve(true, &ids(&["h264_vaapi"]));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.configs()[0].codec, "h264_vaapi");
        assert_eq!(plan.configs()[0].pre_args, ids(&["-hwaccel", "vaapi"]));
        assert_eq!(plan.configs()[1].codec, "libx264");
        assert_eq!(
            plan.configs()[1].fallback_note,
            Some(FallbackNote::HwaccelHandshakeFailed)
        );
    }

    #[test]
    fn test_cuda_wins_priority() {
        let plan = EncoderPlan::resolve(true, &ids(&["h264_qsv", "h264_vaapi", "h264_nvenc"]));
        assert_eq!(plan.configs()[0].codec, "h264_nvenc");
        assert!(plan.configs()[0].pre_args.contains(&"cuda".to_string()));
    }

    #[test]
    fn test_hwaccel_method_names_are_recognized() {
        let plan = EncoderPlan::resolve(true, &ids(&["CUDA"]));
        assert_eq!(plan.configs()[0].codec, "h264_nvenc");

        let plan = EncoderPlan::resolve(true, &ids(&["qsv"]));
        assert_eq!(plan.configs()[0].codec, "h264_qsv");
    }

    #[test]
    fn test_absent_accelerator_skips_hardware() {
        for available in [ids(&[]), ids(&["libx265", "h264_v4l2m2m"])] {
            let plan = EncoderPlan::resolve(true, &available);
            assert_eq!(plan.len(), 1);
            assert_eq!(plan.configs()[0].codec, "libx264");
            assert_eq!(
                plan.configs()[0].fallback_note,
                Some(FallbackNote::HwaccelUnavailable)
            );
        }
    }
}
