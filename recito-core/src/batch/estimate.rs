//! Synthesis duration estimation and the time-based progress curve.
//!
//! Two HTTP engine families have known service-side pacing, so their
//! estimates come from segmented heuristics on text length alone. Everything
//! else is calibrated from the preview synthesis: seconds-per-character
//! extrapolated to the full text plus a fixed overhead.

use crate::engine::descriptor::EngineKind;

/// Fixed overhead added to preview-based extrapolation, seconds.
const PREVIEW_OVERHEAD_S: f64 = 0.5;

/// Expected full-synthesis duration in seconds.
pub fn estimate_duration(
    kind: EngineKind,
    preview_text: &str,
    t_preview_s: f64,
    full_text: &str,
) -> f64 {
    let full_chars = full_text.chars().count();
    match kind {
        EngineKind::OnlineNeural => {
            let base = if full_chars <= 500 {
                10.0
            } else {
                let extra_chars = full_chars - 500;
                10.0 + (extra_chars.div_ceil(500) * 8) as f64
            };
            (base + 3.0).clamp(10.0, 300.0)
        }
        EngineKind::EmotionApi => {
            let segments = full_chars.div_ceil(200).max(1);
            ((segments * 12) as f64 + 5.0).clamp(15.0, 600.0)
        }
        EngineKind::LocalModel | EngineKind::SystemSpeech => {
            let preview_chars = preview_text.chars().count();
            if preview_chars == 0 || full_chars == 0 || t_preview_s <= 0.0 {
                return 10.0;
            }
            let per_char = t_preview_s / preview_chars as f64;
            (per_char * full_chars as f64 + PREVIEW_OVERHEAD_S).clamp(10.0, 3600.0)
        }
    }
}

/// Map elapsed time onto the 20–90 % synthesis band. The elapsed/estimate
/// ratio is capped at 0.95 so the curve stalls just under the persistence
/// stage even when the estimate is exceeded.
pub fn progress_for_elapsed(elapsed_s: f64, estimated_s: f64) -> u8 {
    if estimated_s <= 0.0 {
        return 20;
    }
    let ratio = (elapsed_s / estimated_s).clamp(0.0, 0.95);
    let progress = (20.0 + ratio * 70.0) as u8;
    progress.min(90)
}

pub fn remaining_s(elapsed_s: f64, estimated_s: f64) -> f64 {
    (estimated_s - elapsed_s).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_extrapolation_matches_seeded_scenario() {
        // 20-char preview in 1.0 s, 400-char text:
        // 1.0 / 20 × 400 + 0.5 = 20.5 s.
        let preview: String = "x".repeat(20);
        let full: String = "y".repeat(400);
        let estimate = estimate_duration(EngineKind::LocalModel, &preview, 1.0, &full);
        assert!((estimate - 20.5).abs() < 1e-9);

        // Progress at 10 s elapsed: 20 + 70 × (10 / 20.5) ≈ 54.
        assert_eq!(progress_for_elapsed(10.0, estimate), 54);
    }

    #[test]
    fn preview_extrapolation_clamps_to_bounds() {
        let estimate = estimate_duration(EngineKind::SystemSpeech, "ab", 0.001, "cd");
        assert!((estimate - 10.0).abs() < 1e-9);

        let slow = estimate_duration(EngineKind::LocalModel, "a", 100.0, &"x".repeat(10_000));
        assert!((slow - 3600.0).abs() < 1e-9);
    }

    #[test]
    fn online_neural_heuristic_is_segmented() {
        let short = estimate_duration(EngineKind::OnlineNeural, "", 0.0, &"x".repeat(400));
        assert!((short - 13.0).abs() < 1e-9);

        // 1200 chars: 10 + ceil(700/500)×8 = 26, +3 = 29.
        let long = estimate_duration(EngineKind::OnlineNeural, "", 0.0, &"x".repeat(1200));
        assert!((long - 29.0).abs() < 1e-9);
    }

    #[test]
    fn emotion_api_heuristic_counts_segments() {
        // 450 chars → 3 segments × 12 + 5 = 41.
        let estimate = estimate_duration(EngineKind::EmotionApi, "", 0.0, &"x".repeat(450));
        assert!((estimate - 41.0).abs() < 1e-9);

        // Short text clamps to the 15 s floor... 1 segment × 12 + 5 = 17.
        let tiny = estimate_duration(EngineKind::EmotionApi, "", 0.0, "hi");
        assert!((tiny - 17.0).abs() < 1e-9);
    }

    #[test]
    fn progress_curve_stalls_below_persistence_band() {
        assert_eq!(progress_for_elapsed(0.0, 20.0), 20);
        assert_eq!(progress_for_elapsed(1_000.0, 20.0), 86);
        assert!(progress_for_elapsed(19.0, 20.0) <= 90);
    }

    #[test]
    fn remaining_never_goes_negative() {
        assert_eq!(remaining_s(25.0, 20.0), 0.0);
        assert!((remaining_s(5.0, 20.0) - 15.0).abs() < 1e-9);
    }
}
