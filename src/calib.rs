//! Camera intrinsics and calibration-block decoding.
//!
//! Reading the calibration bytes out of a sensor's EEPROM is transport
//! business; decoding the returned block into an intrinsic matrix and
//! distortion coefficients happens here. Two block layouts exist: a
//! fisheye block with single-precision parameters, and a radial-tangential
//! block with double-precision parameters.

use nalgebra::Matrix3;

use crate::error::TrackerError;

/// Lens distortion model attached to a sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distortion {
    /// Equidistant fisheye: `[k1, k2, k3, k4]`.
    Fisheye([f64; 4]),
    /// Radial-tangential: `[k1, k2, p1, p2, k3]`.
    RadialTangential([f64; 5]),
}

/// Intrinsic calibration of one camera sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// 3×3 pinhole matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub matrix: Matrix3<f64>,
    pub distortion: Distortion,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, distortion: Distortion) -> Self {
        Self {
            matrix: Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            distortion,
        }
    }

    pub fn is_fisheye(&self) -> bool {
        matches!(self.distortion, Distortion::Fisheye(_))
    }
}

/// Size of a raw calibration block.
pub const CALIBRATION_BLOCK_LEN: usize = 128;

fn read_f32(buf: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    f32::from_le_bytes(raw) as f64
}

fn read_f64(buf: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    f64::from_le_bytes(raw)
}

/// Decode a fisheye calibration block.
///
/// Layout: focal length (shared by both axes) at 0x30, principal point at
/// 0x34/0x38, distortion coefficients k1..k4 at 0x48..0x54, all
/// little-endian `f32`.
pub fn decode_fisheye_block(buf: &[u8]) -> Result<CameraIntrinsics, TrackerError> {
    if buf.len() < CALIBRATION_BLOCK_LEN {
        return Err(TrackerError::CalibrationDecode(format!(
            "fisheye block too short: {} bytes",
            buf.len()
        )));
    }

    let f = read_f32(buf, 0x30);
    let cx = read_f32(buf, 0x34);
    let cy = read_f32(buf, 0x38);
    let k = [
        read_f32(buf, 0x48),
        read_f32(buf, 0x4c),
        read_f32(buf, 0x50),
        read_f32(buf, 0x54),
    ];

    if !(f.is_finite() && f > 0.0) {
        return Err(TrackerError::CalibrationDecode(format!(
            "bad fisheye focal length {f}"
        )));
    }

    Ok(CameraIntrinsics::new(f, f, cx, cy, Distortion::Fisheye(k)))
}

/// Decode a radial-tangential calibration block.
///
/// Layout: fx/fy/cx/cy as little-endian `f64` at offsets 18/30/42/54,
/// then k1, k2, p1, p2, k3 at 66/78/90/102/114. The coefficients are
/// stored in the conventional `[k1, k2, p1, p2, k3]` order.
pub fn decode_radial_block(buf: &[u8]) -> Result<CameraIntrinsics, TrackerError> {
    if buf.len() < CALIBRATION_BLOCK_LEN {
        return Err(TrackerError::CalibrationDecode(format!(
            "radial block too short: {} bytes",
            buf.len()
        )));
    }

    let fx = read_f64(buf, 18);
    let fy = read_f64(buf, 30);
    let cx = read_f64(buf, 42);
    let cy = read_f64(buf, 54);
    let k = [
        read_f64(buf, 66),
        read_f64(buf, 78),
        read_f64(buf, 90),
        read_f64(buf, 102),
        read_f64(buf, 114),
    ];

    if !(fx.is_finite() && fx > 0.0 && fy.is_finite() && fy > 0.0) {
        return Err(TrackerError::CalibrationDecode(format!(
            "bad focal lengths {fx} / {fy}"
        )));
    }

    Ok(CameraIntrinsics::new(
        fx,
        fy,
        cx,
        cy,
        Distortion::RadialTangential(k),
    ))
}
