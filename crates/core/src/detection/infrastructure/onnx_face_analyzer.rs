//! Face analysis on ONNX Runtime: YOLO face localisation, ArcFace
//! descriptors and the InsightFace gender/age head.
use std::path::Path;

use ndarray::Array4;

use crate::detection::domain::face_analyzer::{BoundingBox, FaceAnalysis, FaceAnalyzer};
use crate::shared::frame::Frame;

/// Fallback detector input resolution when the model shape is dynamic.
const DEFAULT_INPUT_SIZE: u32 = 640;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const NMS_IOU_THRESH: f64 = 0.45;

const DESCRIPTOR_INPUT_SIZE: usize = 112;
const DESCRIPTOR_MEAN: f32 = 127.5;
const DESCRIPTOR_STD: f32 = 127.5;

const GENDER_AGE_INPUT_SIZE: usize = 96;

/// Faces smaller than this on either side are dropped before description.
const MIN_FACE_SIDE: f64 = 8.0;

pub struct OnnxFaceAnalyzer {
    detector: ort::session::Session,
    descriptor: ort::session::Session,
    gender_age: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

/// Paths to the three model files the analyzer needs.
pub struct OnnxModelPaths<'a> {
    pub detector: &'a Path,
    pub descriptor: &'a Path,
    pub gender_age: &'a Path,
}

impl OnnxFaceAnalyzer {
    pub fn new(models: OnnxModelPaths<'_>, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let detector = build_session(models.detector)?;
        let descriptor = build_session(models.descriptor)?;
        let gender_age = build_session(models.gender_age)?;

        let input_size = detector
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { shape, .. } if shape.len() >= 4 && shape[2] > 0 => {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!("Face analyzer ready (detector input {input_size}px, confidence {confidence})");
        Ok(Self {
            detector,
            descriptor,
            gender_age,
            confidence,
            input_size,
        })
    }

    fn locate(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, Box<dyn std::error::Error>> {
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.detector.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("Face detector produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected detector output shape: {shape:?}").into());
        }
        // Either [1, features, detections] or [1, detections, features].
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        let data = tensor.as_slice().ok_or("Cannot get detector output slice")?;

        if num_feats < 5 {
            return Err(format!("Detector output has {num_feats} features per box").into());
        }

        let mut detections = Vec::new();
        for i in 0..num_dets {
            let value = |f: usize| {
                if transposed {
                    data[f * num_dets + i]
                } else {
                    data[i * num_feats + f]
                }
            };
            let confidence = value(4) as f64;
            if confidence < self.confidence {
                continue;
            }
            let (cx, cy, w, h) = (value(0) as f64, value(1) as f64, value(2) as f64, value(3) as f64);
            detections.push(RawDetection {
                x1: ((cx - w / 2.0) - pad_x as f64) / scale,
                y1: ((cy - h / 2.0) - pad_y as f64) / scale,
                x2: ((cx + w / 2.0) - pad_x as f64) / scale,
                y2: ((cy + h / 2.0) - pad_y as f64) / scale,
                confidence,
            });
        }
        Ok(nms(&mut detections, NMS_IOU_THRESH))
    }

    fn describe(&mut self, crop: &Crop) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let tensor = resize_normalized(crop, DESCRIPTOR_INPUT_SIZE, DESCRIPTOR_MEAN, DESCRIPTOR_STD);
        let outputs = self
            .descriptor
            .run(ort::inputs![ort::value::Tensor::from_array(tensor)?])?;
        let embedding = outputs[0].try_extract_array::<f32>()?;
        let mut descriptor = embedding
            .as_slice()
            .ok_or("Cannot get descriptor slice")?
            .to_vec();
        l2_normalize(&mut descriptor);
        Ok(descriptor)
    }

    fn estimate_gender_age(
        &mut self,
        crop: &Crop,
    ) -> Result<GenderAge, Box<dyn std::error::Error>> {
        let tensor = resize_normalized(crop, GENDER_AGE_INPUT_SIZE, 0.0, 1.0);
        let outputs = self
            .gender_age
            .run(ort::inputs![ort::value::Tensor::from_array(tensor)?])?;
        let raw = outputs[0].try_extract_array::<f32>()?;
        let values = raw.as_slice().ok_or("Cannot get gender/age slice")?;
        let Some(estimate) = decode_gender_age(values) else {
            return Err(format!("Gender/age head returned {} values, expected 3", values.len()).into());
        };
        Ok(estimate)
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<FaceAnalysis>, Box<dyn std::error::Error>> {
        let detections = self.locate(frame)?;
        let mut faces = Vec::with_capacity(detections.len());
        for det in detections {
            let bbox = BoundingBox::from_corners(det.x1, det.y1, det.x2, det.y2)
                .clamped(frame.width(), frame.height());
            if bbox.width < MIN_FACE_SIDE || bbox.height < MIN_FACE_SIDE {
                continue;
            }
            let crop = Crop::from_frame(frame, &bbox);
            let descriptor = self.describe(&crop);
            let estimate = self.estimate_gender_age(&crop);
            faces.extend(assemble_face(bbox, descriptor, estimate));
        }
        Ok(faces)
    }
}

/// Combines the per-face model outputs. A face whose descriptor or
/// gender/age head failed is logged and dropped; the rest of the batch stays.
fn assemble_face(
    bbox: BoundingBox,
    descriptor: Result<Vec<f32>, Box<dyn std::error::Error>>,
    estimate: Result<GenderAge, Box<dyn std::error::Error>>,
) -> Option<FaceAnalysis> {
    let descriptor = match descriptor {
        Ok(d) => d,
        Err(e) => {
            log::warn!("Skipping face at ({:.0}, {:.0}): descriptor failed: {e}", bbox.x, bbox.y);
            return None;
        }
    };
    let estimate = match estimate {
        Ok(g) => g,
        Err(e) => {
            log::warn!("Skipping face at ({:.0}, {:.0}): gender/age failed: {e}", bbox.x, bbox.y);
            return None;
        }
    };
    Some(FaceAnalysis {
        bbox,
        descriptor,
        age: estimate.age,
        gender: estimate.gender.to_string(),
        gender_probability: estimate.probability,
    })
}

fn build_session(model_path: &Path) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let session = ort::session::Session::builder()?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(model_path)?;
    Ok(session)
}

/// Hardware providers per platform; an empty list means CPU only.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Letterbox-resize a frame to a square `target_size` input.
///
/// Returns `(NCHW tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let gray = 114.0f32 / 255.0;
    let size = target_size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, pad_y as usize + y, pad_x as usize + x]] =
                    src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

#[derive(Clone, Debug)]
struct RawDetection {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
}

impl RawDetection {
    fn corners(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Greedy NMS, highest confidence first.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets.iter() {
        if keep
            .iter()
            .all(|kept| bbox_iou(&kept.corners(), &det.corners()) <= iou_thresh)
        {
            keep.push(det.clone());
        }
    }
    keep
}

fn bbox_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

/// Tightly packed RGB pixels cut from a frame.
struct Crop {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

impl Crop {
    fn from_frame(frame: &Frame, bbox: &BoundingBox) -> Self {
        let src = frame.data();
        let frame_w = frame.width() as usize;
        let frame_h = frame.height() as usize;
        let x0 = (bbox.x.floor() as usize).min(frame_w - 1);
        let y0 = (bbox.y.floor() as usize).min(frame_h - 1);
        let width = (bbox.width.round() as usize).clamp(1, frame_w - x0);
        let height = (bbox.height.round() as usize).clamp(1, frame_h - y0);

        let mut data = Vec::with_capacity(width * height * 3);
        for row in y0..y0 + height {
            let start = (row * frame_w + x0) * 3;
            data.extend_from_slice(&src[start..start + width * 3]);
        }
        Self { data, width, height }
    }
}

/// Nearest-neighbour resize to `size` x `size`, `(v - mean) / std`, NCHW.
fn resize_normalized(crop: &Crop, size: usize, mean: f32, std: f32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        let src_y = (((y as f64 + 0.5) * crop.height as f64 / size as f64) as usize).min(crop.height - 1);
        for x in 0..size {
            let src_x =
                (((x as f64 + 0.5) * crop.width as f64 / size as f64) as usize).min(crop.width - 1);
            let offset = (src_y * crop.width + src_x) * 3;
            for c in 0..3 {
                tensor[[0, c, y, x]] = (crop.data[offset + c] as f32 - mean) / std;
            }
        }
    }
    tensor
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GenderAge {
    gender: &'static str,
    probability: f32,
    age: f32,
}

/// Decodes `[female, male, age / 100]`; the gender pair is softmaxed.
fn decode_gender_age(values: &[f32]) -> Option<GenderAge> {
    let [female, male, age]: [f32; 3] = values.get(..3)?.try_into().ok()?;
    let peak = female.max(male);
    let (ef, em) = ((female - peak).exp(), (male - peak).exp());
    let p_male = em / (ef + em);
    let (gender, probability) = if male > female {
        ("male", p_male)
    } else {
        ("female", 1.0 - p_male)
    };
    Some(GenderAge {
        gender,
        probability,
        age: age * 100.0,
    })
}
