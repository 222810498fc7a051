//! Visual checkpoint fingerprinting and step/frame alignment.
//!
//! Checkpoints are compared with a 16x16 greyscale average-hash: cheap,
//! resolution-robust, and a 256-bit hamming distance gives a usable
//! similarity score without pixel equality.

use base64::Engine;
use image::imageops::FilterType;

use crate::models::{Checkpoint, CheckpointMap, Plan, RecordingBundle};

const HASH_SIZE: u32 = 16;
const HASH_BITS: u32 = HASH_SIZE * HASH_SIZE;

/// 256-bit average-hash fingerprint.
pub type Fingerprint = [u64; 4];

/// Fingerprint raw PNG bytes. Returns None when the image cannot be decoded.
pub fn average_hash(png: &[u8]) -> Option<Fingerprint> {
    let img = image::load_from_memory(png).ok()?;
    let small = img.resize_exact(HASH_SIZE, HASH_SIZE, FilterType::Triangle).to_luma8();
    let pixels: Vec<u8> = small.pixels().map(|p| p.0[0]).collect();
    let avg = pixels.iter().map(|&p| p as f64).sum::<f64>() / (HASH_BITS as f64);

    let mut hash = [0u64; 4];
    for (i, &p) in pixels.iter().enumerate() {
        if (p as f64) >= avg {
            hash[i / 64] |= 1u64 << (63 - (i % 64));
        }
    }
    Some(hash)
}

/// Fingerprint a base64-encoded PNG.
pub fn average_hash_b64(png_b64: &str) -> Option<Fingerprint> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(png_b64)
        .ok()?;
    average_hash(&bytes)
}

pub fn hamming_distance(a: &Fingerprint, b: &Fingerprint) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

/// Similarity in [0, 1]; 1.0 means identical fingerprints.
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let dist = hamming_distance(a, b) as f64;
    (1.0 - dist / (HASH_BITS as f64)).max(0.0)
}

/// Precomputed checkpoint fingerprints for one step.
pub fn checkpoint_fingerprints(checkpoints: &[Checkpoint]) -> Vec<(Option<String>, Fingerprint)> {
    checkpoints
        .iter()
        .filter_map(|cp| Some((cp.label.clone(), average_hash_b64(&cp.png_base64)?)))
        .collect()
}

/// Best similarity of a screenshot against a step's checkpoint fingerprints,
/// with the winning label.
pub fn best_match(
    screenshot_b64: &str,
    fingerprints: &[(Option<String>, Fingerprint)],
) -> (f64, Option<String>) {
    let Some(hash) = average_hash_b64(screenshot_b64) else {
        return (0.0, None);
    };
    let mut best = (0.0, None);
    for (label, fp) in fingerprints {
        let score = similarity(&hash, fp);
        if score > best.0 {
            best = (score, label.clone());
        }
    }
    best
}

/// Map plan steps to reference frames from the recording.
///
/// Markers align 1:1 with steps in timestamp order (clamped to
/// `min(|markers|, |steps|)`; steps beyond the markers anchor to the last
/// frame). Without markers, target timestamps spread evenly across the
/// recorded span. Each step gets the nearest frame in time, labeled with the
/// step title.
pub fn derive_step_checkpoints(bundle: &RecordingBundle, plan: &Plan) -> CheckpointMap {
    let mut mapping = CheckpointMap::new();
    if bundle.frames.is_empty() || plan.steps.is_empty() {
        return mapping;
    }

    let frame_ts: Vec<f64> = bundle.frames.iter().map(|f| f.timestamp).collect();

    let target_ts: Vec<f64> = if !bundle.markers.is_empty() {
        let mut markers: Vec<f64> = bundle.markers.iter().map(|m| m.timestamp).collect();
        markers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        markers.truncate(plan.steps.len());
        markers
    } else {
        let start = frame_ts[0];
        let end = *frame_ts.last().unwrap();
        let n = plan.steps.len();
        if end <= start || n == 1 {
            vec![start; n]
        } else {
            let span = end - start;
            (0..n)
                .map(|i| start + (i as f64) * span / ((n - 1) as f64))
                .collect()
        }
    };

    let nearest_index = |ts: f64| -> usize {
        let mut best_i = 0;
        let mut best_d = f64::INFINITY;
        for (i, &fts) in frame_ts.iter().enumerate() {
            let d = (fts - ts).abs();
            if d < best_d {
                best_d = d;
                best_i = i;
            }
        }
        best_i
    };

    for (i, step) in plan.steps.iter().enumerate() {
        let ts = target_ts
            .get(i)
            .copied()
            .unwrap_or_else(|| *frame_ts.last().unwrap());
        let idx = nearest_index(ts);
        mapping.insert(
            step.id.clone(),
            vec![Checkpoint {
                png_base64: bundle.frames[idx].png.clone(),
                label: Some(step.title.clone()),
            }],
        );
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanStep, RecordingFrame, RecordingMarker, VarMap};
    use image::{GrayImage, Luma};

    fn encode_png(img: &GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut bytes);
        image::DynamicImage::ImageLuma8(img.clone())
            .write_to(&mut cursor, image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn half_split_image(flip: bool) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| {
            let left = x < 32;
            if left != flip {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        })
    }

    fn plan_with_steps(n: usize) -> Plan {
        Plan {
            name: "p".to_string(),
            vars: VarMap::new(),
            steps: (1..=n)
                .map(|i| PlanStep {
                    id: format!("s{i}"),
                    title: format!("Step {i}"),
                    instructions: String::new(),
                })
                .collect(),
            start_url: None,
            has_variables: false,
        }
    }

    #[test]
    fn identical_images_have_full_similarity() {
        let png = encode_png(&half_split_image(false));
        let a = average_hash(&png).unwrap();
        let b = average_hash(&png).unwrap();
        assert_eq!(similarity(&a, &b), 1.0);
    }

    #[test]
    fn inverted_images_are_dissimilar() {
        let a = average_hash(&encode_png(&half_split_image(false))).unwrap();
        let b = average_hash(&encode_png(&half_split_image(true))).unwrap();
        assert!(similarity(&a, &b) < 0.1);
    }

    #[test]
    fn similarity_reflects_bit_distance() {
        let a: Fingerprint = [0, 0, 0, 0];
        let mut b = a;
        b[0] = 0b11111_11111; // 10 differing bits
        let score = similarity(&a, &b);
        assert!((score - (1.0 - 10.0 / 256.0)).abs() < 1e-9);
        assert!(score >= 0.88, "passes the default threshold");
        assert!(score < 0.99, "fails a strict threshold");
    }

    #[test]
    fn garbage_input_yields_no_hash() {
        assert!(average_hash(b"not a png").is_none());
        assert!(average_hash_b64("@@@").is_none());
    }

    fn bundle(frames: &[f64], markers: &[f64]) -> RecordingBundle {
        RecordingBundle {
            frames: frames
                .iter()
                .map(|&ts| RecordingFrame {
                    timestamp: ts,
                    png: format!("frame@{ts}"),
                })
                .collect(),
            markers: markers
                .iter()
                .map(|&ts| RecordingMarker {
                    timestamp: ts,
                    label: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn markers_align_steps_to_nearest_frames() {
        let bundle = bundle(&[0.0, 5.0, 10.0, 15.0], &[4.0, 14.0]);
        let mapping = derive_step_checkpoints(&bundle, &plan_with_steps(2));
        assert_eq!(mapping["s1"][0].png_base64, "frame@5");
        assert_eq!(mapping["s2"][0].png_base64, "frame@15");
        assert_eq!(mapping["s1"][0].label.as_deref(), Some("Step 1"));
    }

    #[test]
    fn extra_steps_beyond_markers_anchor_to_last_frame() {
        let bundle = bundle(&[0.0, 5.0, 10.0], &[0.5]);
        let mapping = derive_step_checkpoints(&bundle, &plan_with_steps(3));
        assert_eq!(mapping["s1"][0].png_base64, "frame@0");
        assert_eq!(mapping["s2"][0].png_base64, "frame@10");
        assert_eq!(mapping["s3"][0].png_base64, "frame@10");
    }

    #[test]
    fn no_markers_spreads_evenly() {
        let bundle = bundle(&[0.0, 5.0, 10.0], &[]);
        let mapping = derive_step_checkpoints(&bundle, &plan_with_steps(3));
        assert_eq!(mapping["s1"][0].png_base64, "frame@0");
        assert_eq!(mapping["s2"][0].png_base64, "frame@5");
        assert_eq!(mapping["s3"][0].png_base64, "frame@10");
    }

    #[test]
    fn single_step_without_markers_uses_first_frame() {
        let bundle = bundle(&[2.0, 9.0], &[]);
        let mapping = derive_step_checkpoints(&bundle, &plan_with_steps(1));
        assert_eq!(mapping["s1"][0].png_base64, "frame@2");
    }

    #[test]
    fn empty_inputs_yield_no_checkpoints() {
        assert!(derive_step_checkpoints(&RecordingBundle::default(), &plan_with_steps(2)).is_empty());
        assert!(derive_step_checkpoints(&bundle(&[1.0], &[]), &plan_with_steps(0)).is_empty());
    }
}
