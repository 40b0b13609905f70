// src/analysis/posture.rs
//
// Geometric posture heuristics over a single COCO-17 keypoint set.
//
// Sitting is scored from up to four independent cues (one point each):
//   1. left knee angle inside the bent-knee band
//   2. right knee angle inside the bent-knee band
//   3. knees roughly level with the hips
//   4. upright torso (small lateral lean)
// A score at or above `sitting_min_score` reads as Sitting.
//
// Chair boxes are accepted but not required: pose evidence alone decides.
// A crouch or kneel can therefore read as Sitting; this is posture
// resemblance, not proof that someone is on a chair.

use crate::types::{KeypointKind, ObjectBox, PersonStatus, Pose, PostureConfig};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureReading {
    pub status: PersonStatus,
    /// Knee angle (degrees) that supported a Sitting call, 0 otherwise
    pub support_angle: f32,
    pub sitting_score: u32,
}

impl PostureReading {
    fn standing() -> Self {
        Self {
            status: PersonStatus::Standing,
            support_angle: 0.0,
            sitting_score: 0,
        }
    }
}

/// Angle at `b` formed by `a-b-c`, in degrees within [0, 180].
pub fn joint_angle(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
    let radians = (c.1 - b.1).atan2(c.0 - b.0) - (a.1 - b.1).atan2(a.0 - b.0);
    let angle = radians.to_degrees().abs();
    if angle > 180.0 {
        360.0 - angle
    } else {
        angle
    }
}

pub struct PostureClassifier {
    config: PostureConfig,
}

impl PostureClassifier {
    pub fn new(config: PostureConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, pose: &Pose, _nearby_objects: &[ObjectBox]) -> PostureReading {
        if !pose.is_complete() {
            trace!("Truncated keypoint set ({} joints)", pose.keypoints.len());
            return PostureReading::standing();
        }

        use KeypointKind::*;
        let cfg = &self.config;
        let xy = |kind: KeypointKind| {
            pose.joint(kind)
                .map(|k| (k.x, k.y))
                .unwrap_or((0.0, 0.0))
        };

        let (left_hip, right_hip) = (xy(LeftHip), xy(RightHip));
        let hip_x = (left_hip.0 + right_hip.0) / 2.0;
        let hip_y = (left_hip.1 + right_hip.1) / 2.0;

        let mut score = 0;
        let mut support_angle = 0.0;

        let in_knee_band =
            |angle: f32| angle > cfg.knee_angle_min_deg && angle < cfg.knee_angle_max_deg;

        if let (Some(hip), Some(knee), Some(ankle)) = (
            pose.observed(LeftHip),
            pose.observed(LeftKnee),
            pose.observed(LeftAnkle),
        ) {
            let angle = joint_angle(hip, knee, ankle);
            if in_knee_band(angle) {
                score += 1;
                support_angle = angle;
            }
        }

        if let (Some(hip), Some(knee), Some(ankle)) = (
            pose.observed(RightHip),
            pose.observed(RightKnee),
            pose.observed(RightAnkle),
        ) {
            let angle = joint_angle(hip, knee, ankle);
            if in_knee_band(angle) {
                score += 1;
                if support_angle == 0.0 {
                    support_angle = angle;
                }
            }
        }

        if let (Some(left_knee), Some(right_knee)) =
            (pose.observed(LeftKnee), pose.observed(RightKnee))
        {
            let knee_y = (left_knee.1 + right_knee.1) / 2.0;
            let hip_knee_diff = hip_y - knee_y;
            if hip_knee_diff > cfg.hip_knee_min_px && hip_knee_diff < cfg.hip_knee_max_px {
                score += 1;
            }
        }

        if let (Some(left_sh), Some(right_sh)) =
            (pose.observed(LeftShoulder), pose.observed(RightShoulder))
        {
            if hip_x > 0.0 {
                let shoulder_x = (left_sh.0 + right_sh.0) / 2.0;
                let shoulder_y = (left_sh.1 + right_sh.1) / 2.0;
                let vertical = hip_y - shoulder_y;
                let horizontal = (hip_x - shoulder_x).abs();
                if vertical > 0.0 && horizontal < vertical * cfg.torso_lean_ratio {
                    score += 1;
                }
            }
        }

        if score >= cfg.sitting_min_score {
            PostureReading {
                status: PersonStatus::Sitting,
                support_angle,
                sitting_score: score,
            }
        } else {
            PostureReading {
                sitting_score: score,
                ..PostureReading::standing()
            }
        }
    }

    /// Head tipped toward the chest, the usual phone-reading pose.
    pub fn is_head_down(&self, pose: &Pose) -> bool {
        use KeypointKind::*;
        let (Some(nose), Some(left_eye), Some(right_eye), Some(left_sh), Some(right_sh)) = (
            pose.observed(Nose),
            pose.observed(LeftEye),
            pose.observed(RightEye),
            pose.observed(LeftShoulder),
            pose.observed(RightShoulder),
        ) else {
            return false;
        };

        let eye_y = (left_eye.1 + right_eye.1) / 2.0;
        let shoulder_y = (left_sh.1 + right_sh.1) / 2.0;
        let eye_to_shoulder = shoulder_y - eye_y;
        if eye_to_shoulder <= 0.0 {
            return false;
        }

        (nose.1 - eye_y) / eye_to_shoulder > self.config.head_down_ratio_threshold
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::types::{Keypoint, KeypointKind, Pose, NUM_KEYPOINTS};

    pub fn pose_with(joints: &[(KeypointKind, f32, f32)]) -> Pose {
        let mut keypoints = vec![Keypoint::default(); NUM_KEYPOINTS];
        for &(kind, x, y) in joints {
            keypoints[kind.idx()] = Keypoint::new(x, y, 0.9);
        }
        Pose::new(keypoints)
    }

    /// Thighs horizontal, shins vertical, upright torso: all four cues.
    pub fn seated_pose() -> Pose {
        use KeypointKind::*;
        pose_with(&[
            (Nose, 130.0, 100.0),
            (LeftEye, 125.0, 90.0),
            (RightEye, 135.0, 90.0),
            (LeftShoulder, 110.0, 150.0),
            (RightShoulder, 150.0, 150.0),
            (LeftHip, 100.0, 300.0),
            (RightHip, 140.0, 300.0),
            (LeftKnee, 160.0, 300.0),
            (RightKnee, 200.0, 300.0),
            (LeftAnkle, 160.0, 380.0),
            (RightAnkle, 200.0, 380.0),
        ])
    }

    /// Both knees bent at 90 degrees but thighs steep and no shoulders:
    /// exactly two cues.
    pub fn two_cue_pose() -> Pose {
        use KeypointKind::*;
        pose_with(&[
            (Nose, 120.0, 100.0),
            (LeftHip, 100.0, 200.0),
            (RightHip, 140.0, 200.0),
            (LeftKnee, 130.0, 320.0),
            (RightKnee, 170.0, 320.0),
            (LeftAnkle, 10.0, 350.0),
            (RightAnkle, 50.0, 350.0),
        ])
    }

    /// Straight legs, knees well below hips, no shoulders: zero cues.
    pub fn standing_pose() -> Pose {
        use KeypointKind::*;
        pose_with(&[
            (Nose, 120.0, 100.0),
            (LeftHip, 100.0, 300.0),
            (RightHip, 140.0, 300.0),
            (LeftKnee, 100.0, 400.0),
            (RightKnee, 140.0, 400.0),
            (LeftAnkle, 100.0, 500.0),
            (RightAnkle, 140.0, 500.0),
        ])
    }
}
