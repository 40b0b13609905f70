use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub posture: PostureConfig,
    pub session: SessionConfig,
    pub alert: AlertConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// IoU a detection must exceed to re-associate with a live session
    pub iou_match_threshold: f32,
    /// Centroid distance (detector pixels) under which the fallback pass matches
    pub distance_match_threshold_px: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_match_threshold: 0.3,
            distance_match_threshold_px: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureConfig {
    /// Points needed (out of 4) to call a pose Sitting
    pub sitting_min_score: u32,
    pub knee_angle_min_deg: f32,
    pub knee_angle_max_deg: f32,
    /// Band for (mean hip y - mean knee y); image y grows downward
    pub hip_knee_min_px: f32,
    pub hip_knee_max_px: f32,
    /// Max horizontal/vertical torso ratio (0.5 is roughly 27 degrees of lean)
    pub torso_lean_ratio: f32,
    /// (nose_y - eye_y) / (shoulder_y - eye_y) above which the head counts as down
    pub head_down_ratio_threshold: f32,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            sitting_min_score: 2,
            knee_angle_min_deg: 60.0,
            knee_angle_max_deg: 120.0,
            hip_knee_min_px: -50.0,
            hip_knee_max_px: 100.0,
            torso_lean_ratio: 0.5,
            head_down_ratio_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_expiry_s: f64,
    pub render_grace_s: f64,
    pub min_sitting_duration_s: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_expiry_s: 1.0,
            render_grace_s: 0.5,
            min_sitting_duration_s: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub alert_cooldown_s: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_cooldown_s: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub input_dir: String,
    pub output_dir: String,
    /// Tick ceiling; 0 replays as fast as possible
    pub fps_limit: u32,
    /// Object detections below this confidence are dropped on ingest
    pub conf_threshold: f32,
    /// Offset applied to event wall-clock stamps
    pub utc_offset_hours: i32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            input_dir: "detections".to_string(),
            output_dir: "output".to_string(),
            fps_limit: 60,
            conf_threshold: 0.25,
            utc_offset_hours: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "activity_tracker=info".to_string(),
        }
    }
}

// ============================================================================
// POSE INPUT
// ============================================================================

/// Number of joints in the COCO keypoint schema the pose model emits.
pub const NUM_KEYPOINTS: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypointKind {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl KeypointKind {
    pub fn idx(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, score: f32) -> Self {
        Self { x, y, score }
    }

    /// The detector reports missing joints at the origin.
    pub fn is_observed(&self) -> bool {
        self.x > 0.0
    }
}

/// One person's keypoints in detector order. May hold fewer than
/// `NUM_KEYPOINTS` entries when the upstream output is truncated.
#[derive(Debug, Clone, Default)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    pub fn from_triplets(triplets: &[[f32; 3]]) -> Self {
        Self::new(
            triplets
                .iter()
                .map(|t| Keypoint::new(t[0], t[1], t[2]))
                .collect(),
        )
    }

    pub fn is_complete(&self) -> bool {
        self.keypoints.len() >= NUM_KEYPOINTS
    }

    /// Raw joint, observed or not. `None` only when the set is truncated.
    pub fn joint(&self, kind: KeypointKind) -> Option<Keypoint> {
        self.keypoints.get(kind.idx()).copied()
    }

    /// Joint coordinates if the joint was observed.
    pub fn observed(&self, kind: KeypointKind) -> Option<(f32, f32)> {
        self.joint(kind)
            .filter(Keypoint::is_observed)
            .map(|k| (k.x, k.y))
    }

    /// Bounding extent of all observed joints.
    pub fn bbox(&self) -> Option<BBox> {
        let mut observed = self.keypoints.iter().filter(|k| k.is_observed());
        let first = observed.next()?;
        let mut bbox = BBox::new(first.x, first.y, first.x, first.y);
        for k in observed {
            bbox.x1 = bbox.x1.min(k.x);
            bbox.y1 = bbox.y1.min(k.y);
            bbox.x2 = bbox.x2.max(k.x);
            bbox.y2 = bbox.y2.max(k.y);
        }
        Some(bbox)
    }

    /// Nose position, used to anchor the overlay. Both coordinates must be positive.
    pub fn head_position(&self) -> Option<(f32, f32)> {
        self.joint(KeypointKind::Nose)
            .filter(|k| k.x > 0.0 && k.y > 0.0)
            .map(|k| (k.x, k.y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_array(b: [f32; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn centroid_distance(&self, other: &BBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

// ============================================================================
// OBJECT INPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectClass {
    Chair,
    Phone,
    Laptop,
    Cup,
    Book,
}

impl ObjectClass {
    /// COCO class ids emitted by the segmentation model.
    pub fn from_coco_id(class_id: u32) -> Option<Self> {
        match class_id {
            56 => Some(Self::Chair),
            67 => Some(Self::Phone),
            63 => Some(Self::Laptop),
            41 => Some(Self::Cup),
            73 => Some(Self::Book),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chair => "Chair",
            Self::Phone => "Phone",
            Self::Laptop => "Laptop",
            Self::Cup => "Cup",
            Self::Book => "Book",
        }
    }

    /// Classes that give audit context to an alert.
    pub fn is_alert_context(&self) -> bool {
        matches!(self, Self::Laptop | Self::Cup | Self::Book)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectBox {
    pub class: ObjectClass,
    pub bbox: BBox,
    pub confidence: f32,
}

// ============================================================================
// DETECTION FRAME
// ============================================================================

/// Everything the perception model produced for one tick.
#[derive(Debug, Clone)]
pub struct DetectionFrame {
    pub frame_id: u64,
    /// Monotonic tick time in seconds; all session arithmetic uses this
    pub timestamp_s: f64,
    /// Wall-clock stamp copied onto emitted events
    pub wall_time: DateTime<FixedOffset>,
    pub persons: Vec<Pose>,
    pub objects: Vec<ObjectBox>,
    /// Encoded rendered frame handed to the sink alongside alerts
    pub snapshot: Option<Vec<u8>>,
}

impl DetectionFrame {
    pub fn new(frame_id: u64, timestamp_s: f64, wall_time: DateTime<FixedOffset>) -> Self {
        Self {
            frame_id,
            timestamp_s,
            wall_time,
            persons: Vec::new(),
            objects: Vec::new(),
            snapshot: None,
        }
    }

    pub fn objects_of(&self, class: ObjectClass) -> Vec<ObjectBox> {
        self.objects
            .iter()
            .filter(|o| o.class == class)
            .copied()
            .collect()
    }

    pub fn phone_seen(&self) -> bool {
        self.objects.iter().any(|o| o.class == ObjectClass::Phone)
    }

    /// Distinct context classes in detection order.
    pub fn context_classes(&self) -> Vec<ObjectClass> {
        let mut classes: Vec<ObjectClass> = Vec::new();
        for obj in &self.objects {
            if obj.class.is_alert_context() && !classes.contains(&obj.class) {
                classes.push(obj.class);
            }
        }
        classes
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Tracker-assigned handle. Allocated once, never reused.
pub type TrackId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonStatus {
    Standing,
    Sitting,
}

impl PersonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standing => "Standing",
            Self::Sitting => "Sitting",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Standing => "STANDING",
            Self::Sitting => "SITTING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedSittingSession {
    pub identity: TrackId,
    pub duration_seconds: u64,
    pub ended_at: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    PhoneUsage,
    SuspectedPhoneUse,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhoneUsage => "Phone Usage",
            Self::SuspectedPhoneUse => "Suspected Phone Use",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub event_id: Uuid,
    pub kind: AlertKind,
    pub occurred_at: DateTime<FixedOffset>,
    pub description: String,
    pub objects: Vec<ObjectClass>,
}
