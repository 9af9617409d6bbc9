use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::{tract_ndarray::Array4, TypedModel, *};
use tracing::debug;

use crate::{
    error::AppError,
    types::{Candidate, FaceRect},
};

/// Input size of the RFB-320 face model
const INPUT_WIDTH: usize = 320;
const INPUT_HEIGHT: usize = 240;

/// Anything that can find faces in a frame
pub trait FaceDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<FaceRect>>;
}

/// Model location and post-processing thresholds
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Faces narrower or shorter than this are ignored
    pub min_face_size: u32,
}

/// UltraFace-style ONNX face detector run through tract. The model takes a
/// normalized 320x240 RGB tensor and returns per-anchor `scores` (N x 2) and
/// corner `boxes` (N x 4) in relative coordinates.
pub struct OnnxFaceDetector {
    model: RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>,
    config: DetectorConfig,
}

impl OnnxFaceDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, AppError> {
        let load = || -> TractResult<_> {
            tract_onnx::onnx()
                .model_for_path(&config.model_path)?
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, INPUT_HEIGHT, INPUT_WIDTH),
                    ),
                )?
                .into_optimized()?
                .into_runnable()
        };
        let model = load().map_err(|err| AppError::ClassifierLoad {
            path: config.model_path.clone(),
            reason: format!("{err:#}"),
        })?;
        Ok(Self { model, config })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<FaceRect>> {
        let resized = image::imageops::resize(
            frame,
            INPUT_WIDTH as u32,
            INPUT_HEIGHT as u32,
            FilterType::Triangle,
        );
        let mut input = Array4::<f32>::zeros((1, 3, INPUT_HEIGHT, INPUT_WIDTH));
        let raw = resized.as_raw();
        for y in 0..INPUT_HEIGHT {
            for x in 0..INPUT_WIDTH {
                let idx = (y * INPUT_WIDTH + x) * 3;
                for c in 0..3 {
                    input[(0, c, y, x)] = (raw[idx + c] as f32 - 127.0) / 128.0;
                }
            }
        }
        let tensor: Tensor = input.into();
        let outputs = self.model.run(tvec!(tensor.into_tvalue()))?;

        let mut scores = None;
        let mut boxes = None;
        for output in outputs.iter() {
            let view = output.to_array_view::<f32>()?;
            match view.shape().last().copied() {
                Some(2) => scores = Some(view),
                Some(4) => boxes = Some(view),
                _ => bail!("unexpected model output shape: {:?}", view.shape()),
            }
        }
        let scores = scores.ok_or_else(|| anyhow!("model returned no scores output"))?;
        let boxes = boxes.ok_or_else(|| anyhow!("model returned no boxes output"))?;
        let scores = scores
            .as_slice()
            .ok_or_else(|| anyhow!("scores output is not contiguous"))?;
        let boxes = boxes
            .as_slice()
            .ok_or_else(|| anyhow!("boxes output is not contiguous"))?;

        let candidates = parse_ultraface(scores, boxes, frame.dimensions(), self.config.score_threshold);
        let kept = apply_nms(candidates, self.config.nms_threshold);
        let faces = to_face_rects(&kept, frame.dimensions(), self.config.min_face_size);
        debug!(candidates = kept.len(), faces = faces.len(), "face detection");
        Ok(faces)
    }
}

/// Turns raw anchor outputs into pixel-space candidates above `score_threshold`.
fn parse_ultraface(
    scores: &[f32],
    boxes: &[f32],
    frame_size: (u32, u32),
    score_threshold: f32,
) -> Vec<Candidate> {
    let (width, height) = (frame_size.0 as f32, frame_size.1 as f32);
    scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(score, _)| score[1] >= score_threshold)
        .map(|(score, bbox)| Candidate {
            x1: bbox[0] * width,
            y1: bbox[1] * height,
            x2: bbox[2] * width,
            y2: bbox[3] * height,
            score: score[1],
        })
        .collect()
}

fn apply_nms(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut result: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let keep = result.iter().all(|picked| iou(picked, &cand) < threshold);
        if keep {
            result.push(cand);
        }
    }
    result
}

/// Clamps candidates into the frame and drops the ones smaller than `min_size`.
fn to_face_rects(candidates: &[Candidate], frame_size: (u32, u32), min_size: u32) -> Vec<FaceRect> {
    let (width, height) = (frame_size.0 as f32, frame_size.1 as f32);
    candidates
        .iter()
        .filter_map(|cand| {
            let x1 = cand.x1.clamp(0.0, width);
            let y1 = cand.y1.clamp(0.0, height);
            let x2 = cand.x2.clamp(0.0, width);
            let y2 = cand.y2.clamp(0.0, height);
            let rect = FaceRect::new(
                x1.round() as u32,
                y1.round() as u32,
                (x2 - x1).round() as u32,
                (y2 - y1).round() as u32,
            );
            (rect.width >= min_size && rect.height >= min_size).then_some(rect)
        })
        .collect()
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let iw = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let ih = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = iw * ih;
    if intersection <= 0.0 {
        return 0.0;
    }
    let union = a.width() * a.height() + b.width() * b.height() - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Candidate {
        Candidate {
            x1,
            y1,
            x2,
            y2,
            score,
        }
    }

    #[test]
    fn parse_keeps_confident_anchors_in_pixels() {
        let scores = [0.9, 0.1, 0.2, 0.8, 0.5, 0.5];
        let boxes = [
            0.0, 0.0, 0.5, 0.5, //
            0.25, 0.5, 0.75, 1.0, //
            0.1, 0.1, 0.2, 0.2,
        ];
        let found = parse_ultraface(&scores, &boxes, (640, 480), 0.7);
        assert_eq!(found.len(), 1);
        let face = found[0];
        assert_eq!((face.x1, face.y1, face.x2, face.y2), (160.0, 240.0, 480.0, 480.0));
        assert!((face.score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn nms_drops_overlapping_weaker_boxes() {
        let kept = apply_nms(
            vec![
                cand(0.0, 0.0, 100.0, 100.0, 0.8),
                cand(5.0, 5.0, 105.0, 105.0, 0.95),
                cand(300.0, 300.0, 400.0, 400.0, 0.75),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.95);
        assert_eq!(kept[1].score, 0.75);
    }

    #[test]
    fn small_faces_are_filtered() {
        let faces = to_face_rects(
            &[
                cand(10.0, 10.0, 60.0, 60.0, 0.9),
                cand(100.0, 50.0, 250.0, 220.0, 0.9),
            ],
            (640, 480),
            100,
        );
        assert_eq!(faces, vec![FaceRect::new(100, 50, 150, 170)]);
    }

    #[test]
    fn boxes_are_clamped_to_frame() {
        let faces = to_face_rects(&[cand(-20.0, -10.0, 150.0, 200.0, 0.9)], (120, 160), 0);
        assert_eq!(faces, vec![FaceRect::new(0, 0, 120, 160)]);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_model_is_a_classifier_error() {
        let config = DetectorConfig {
            model_path: PathBuf::from("does/not/exist.onnx"),
            score_threshold: 0.7,
            nms_threshold: 0.3,
            min_face_size: 100,
        };
        match OnnxFaceDetector::new(config) {
            Err(AppError::ClassifierLoad { path, .. }) => {
                assert_eq!(path, PathBuf::from("does/not/exist.onnx"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("model should not load"),
        }
    }
}
