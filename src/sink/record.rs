//! MP4 recording sink
//!
//! Muxes the incoming H.264 access units into an MP4 file without
//! re-encoding. Samples are converted from Annex-B to AVCC framing; the
//! track is opened lazily on the first keyframe, once SPS/PPS have been
//! seen, because the parameter sets carry the track dimensions. The moov
//! box is written by `finalize` — an abrupt kill yields an unplayable file,
//! which is accepted.

use crate::media::h264::{annexb_to_avcc, extract_parameter_sets};
use crate::media::VideoSample;
use crate::sink::RecordingSink;
use crate::{Error, Result};
use mp4::{AvcConfig, MediaConfig, Mp4Config, Mp4Writer, TrackConfig};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Container timescale: milliseconds
const TIMESCALE: u32 = 1000;

/// Fallback duration for the final sample, one frame at 30 fps
const DEFAULT_SAMPLE_DURATION: Duration = Duration::from_millis(33);

/// Lazy MP4 muxer for one H.264 video track
pub struct Mp4Recorder {
    output_path: PathBuf,
    writer: Option<Mp4Writer<BufWriter<File>>>,
    track_id: u32,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    /// Last accepted sample, held back so its duration can be derived from
    /// the next sample's pts
    pending: Option<VideoSample>,
    sample_count: u64,
    warned_waiting: bool,
}

impl Mp4Recorder {
    /// Create a recorder; the output file is not touched until the first
    /// writable keyframe arrives
    pub fn new(output_path: impl AsRef<Path>) -> Self {
        Self {
            output_path: output_path.as_ref().to_path_buf(),
            writer: None,
            track_id: 0,
            sps: None,
            pps: None,
            pending: None,
            sample_count: 0,
            warned_waiting: false,
        }
    }

    /// Number of samples written so far (excluding the held-back one)
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    fn init_writer(&mut self) -> Result<()> {
        let (Some(sps), Some(pps)) = (self.sps.as_ref(), self.pps.as_ref()) else {
            return Err(Error::Sink("keyframe seen before SPS/PPS".to_string()));
        };

        let (width, height) = parse_sps_dimensions(sps)
            .ok_or_else(|| Error::Sink("cannot parse dimensions from SPS".to_string()))?;

        info!(
            "Recording {}x{} video to {}",
            width,
            height,
            self.output_path.display()
        );

        let file = File::create(&self.output_path)
            .map_err(|e| Error::Sink(format!("cannot create output file: {e}")))?;

        let config = Mp4Config {
            major_brand: str::parse("isom").unwrap(),
            minor_version: 512,
            compatible_brands: vec![
                str::parse("isom").unwrap(),
                str::parse("iso2").unwrap(),
                str::parse("avc1").unwrap(),
                str::parse("mp41").unwrap(),
            ],
            timescale: TIMESCALE,
        };

        let mut writer = Mp4Writer::write_start(BufWriter::new(file), &config)
            .map_err(|e| Error::Sink(format!("cannot start MP4 writer: {e}")))?;

        let track_config = TrackConfig {
            track_type: mp4::TrackType::Video,
            timescale: TIMESCALE,
            language: String::from("und"),
            media_conf: MediaConfig::AvcConfig(AvcConfig {
                width,
                height,
                seq_param_set: sps.clone(),
                pic_param_set: pps.clone(),
            }),
        };

        writer
            .add_track(&track_config)
            .map_err(|e| Error::Sink(format!("cannot add video track: {e}")))?;

        self.writer = Some(writer);
        self.track_id = 1;
        Ok(())
    }

    fn write_sample(&mut self, sample: &VideoSample, duration: Duration) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let mp4_sample = mp4::Mp4Sample {
            start_time: sample.pts.as_millis() as u64,
            duration: duration.as_millis().max(1) as u32,
            rendering_offset: 0,
            is_sync: sample.is_keyframe,
            bytes: annexb_to_avcc(&sample.data).into(),
        };

        writer
            .write_sample(self.track_id, &mp4_sample)
            .map_err(|e| Error::Sink(format!("sample write failed: {e}")))?;
        self.sample_count += 1;
        Ok(())
    }
}

impl RecordingSink for Mp4Recorder {
    fn write_video(&mut self, sample: &VideoSample) -> Result<()> {
        let (sps, pps) = extract_parameter_sets(&sample.data);
        if let Some(sps) = sps {
            self.sps = Some(sps);
        }
        if let Some(pps) = pps {
            self.pps = Some(pps);
        }

        if self.writer.is_none() {
            if !sample.is_keyframe || self.sps.is_none() || self.pps.is_none() {
                if !self.warned_waiting {
                    debug!("Recorder waiting for a keyframe with parameter sets");
                    self.warned_waiting = true;
                }
                return Ok(());
            }
            self.init_writer()?;
        }

        if let Some(previous) = self.pending.take() {
            let duration = sample.pts.saturating_sub(previous.pts);
            self.write_sample(&previous, duration)?;
        }
        self.pending = Some(sample.clone());
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(last) = self.pending.take() {
            if self.writer.is_some() {
                self.write_sample(&last, DEFAULT_SAMPLE_DURATION)?;
            }
        }

        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        writer
            .write_end()
            .map_err(|e| Error::Sink(format!("finalize failed: {e}")))?;
        info!(
            "Finalized {} ({} samples)",
            self.output_path.display(),
            self.sample_count
        );
        Ok(())
    }
}

impl Drop for Mp4Recorder {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.finalize() {
                warn!("Recorder finalize on drop failed: {}", e);
            }
        }
    }
}

/// Decode luma dimensions from an SPS NAL unit (header byte included).
///
/// Implements just enough of the H.264 SPS syntax to reach
/// `pic_width_in_mbs_minus1` and the cropping window. Returns `None` on any
/// malformed input.
pub fn parse_sps_dimensions(sps: &[u8]) -> Option<(u16, u16)> {
    // Strip the NAL header and emulation prevention bytes.
    let rbsp = unescape_rbsp(sps.get(1..)?);
    let mut reader = BitReader::new(&rbsp);

    let profile_idc = reader.read_bits(8)?;
    let _constraint_flags = reader.read_bits(8)?;
    let _level_idc = reader.read_bits(8)?;
    let _sps_id = reader.read_ue()?;

    let mut chroma_format_idc = 1; // 4:2:0 unless signalled otherwise
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = reader.read_ue()?;
        if chroma_format_idc == 3 {
            let _separate_colour_plane = reader.read_bits(1)?;
        }
        let _bit_depth_luma = reader.read_ue()?;
        let _bit_depth_chroma = reader.read_ue()?;
        let _transform_bypass = reader.read_bits(1)?;
        let scaling_matrix_present = reader.read_bits(1)? == 1;
        if scaling_matrix_present {
            let list_count = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..list_count {
                if reader.read_bits(1)? == 1 {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num = reader.read_ue()?;
    let pic_order_cnt_type = reader.read_ue()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_poc_lsb = reader.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_always_zero = reader.read_bits(1)?;
        let _offset_non_ref = reader.read_se()?;
        let _offset_top_bottom = reader.read_se()?;
        let cycle_len = reader.read_ue()?;
        for _ in 0..cycle_len {
            let _offset = reader.read_se()?;
        }
    }

    let _max_num_ref_frames = reader.read_ue()?;
    let _gaps_allowed = reader.read_bits(1)?;

    let pic_width_in_mbs_minus1 = reader.read_ue()?;
    let pic_height_in_map_units_minus1 = reader.read_ue()?;
    let frame_mbs_only = reader.read_bits(1)?;
    if frame_mbs_only == 0 {
        let _mb_adaptive = reader.read_bits(1)?;
    }
    let _direct_8x8 = reader.read_bits(1)?;

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if reader.read_bits(1)? == 1 {
        crop_left = reader.read_ue()?;
        crop_right = reader.read_ue()?;
        crop_top = reader.read_ue()?;
        crop_bottom = reader.read_ue()?;
    }

    let (crop_unit_x, crop_unit_y) = match chroma_format_idc {
        0 => (1, 2 - u64::from(frame_mbs_only)),
        1 => (2, 2 * (2 - u64::from(frame_mbs_only))),
        2 => (2, 2 - u64::from(frame_mbs_only)),
        _ => (1, 2 - u64::from(frame_mbs_only)),
    };

    // A cropping window larger than the coded size is malformed input, so
    // all of this is checked rather than trusted.
    let width = (pic_width_in_mbs_minus1 + 1)
        .checked_mul(16)?
        .checked_sub(crop_left.checked_add(crop_right)?.checked_mul(crop_unit_x)?)?;
    let height = (2 - u64::from(frame_mbs_only))
        .checked_mul(pic_height_in_map_units_minus1 + 1)?
        .checked_mul(16)?
        .checked_sub(crop_top.checked_add(crop_bottom)?.checked_mul(crop_unit_y)?)?;

    if width == 0 || height == 0 || width > u64::from(u16::MAX) || height > u64::from(u16::MAX) {
        return None;
    }
    Some((width as u16, height as u16))
}

fn skip_scaling_list(reader: &mut BitReader<'_>, size: usize) -> Option<()> {
    let mut last_scale: i64 = 8;
    let mut next_scale: i64 = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = reader.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Some(())
}

/// Remove 0x000003 emulation prevention bytes from an RBSP
fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(byte);
    }
    out
}

/// MSB-first bit reader with Exp-Golomb helpers
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bits(&mut self, count: u32) -> Option<u64> {
        let mut value = 0u64;
        for _ in 0..count {
            let byte = *self.data.get(self.pos / 8)?;
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | u64::from(bit);
            self.pos += 1;
        }
        Some(value)
    }

    /// Unsigned Exp-Golomb
    fn read_ue(&mut self) -> Option<u64> {
        let mut leading_zeros = 0u32;
        while self.read_bits(1)? == 0 {
            leading_zeros += 1;
            if leading_zeros > 32 {
                return None;
            }
        }
        let suffix = if leading_zeros > 0 {
            self.read_bits(leading_zeros)?
        } else {
            0
        };
        Some((1u64 << leading_zeros) - 1 + suffix)
    }

    /// Signed Exp-Golomb
    fn read_se(&mut self) -> Option<i64> {
        let code = self.read_ue()?;
        let value = code.div_ceil(2) as i64;
        Some(if code % 2 == 1 { value } else { -value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::NAL_IDR;
    use bytes::Bytes;

    /// MSB-first bit writer for building synthetic SPS payloads
    struct BitWriter {
        bytes: Vec<u8>,
        bit: u8,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bytes: vec![], bit: 0 }
        }

        fn put_bits(&mut self, value: u64, count: u32) {
            for i in (0..count).rev() {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                let bit = ((value >> i) & 1) as u8;
                let last = self.bytes.last_mut().unwrap();
                *last |= bit << (7 - self.bit);
                self.bit = (self.bit + 1) % 8;
            }
        }

        fn put_ue(&mut self, value: u64) {
            let code = value + 1;
            let bits = 64 - code.leading_zeros();
            self.put_bits(0, bits - 1);
            self.put_bits(code, bits);
        }

        fn finish(mut self) -> Vec<u8> {
            // rbsp_stop_one_bit + alignment
            self.put_bits(1, 1);
            while self.bit != 0 {
                self.put_bits(0, 1);
            }
            self.bytes
        }
    }

    /// Baseline-profile SPS for the given macroblock dimensions and an
    /// optional (left, right, top, bottom) cropping window
    fn build_sps(width_mbs: u64, height_mbs: u64, crop: Option<(u64, u64, u64, u64)>) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bits(66, 8); // profile_idc: baseline
        w.put_bits(0, 8); // constraint flags
        w.put_bits(30, 8); // level_idc
        w.put_ue(0); // sps_id
        w.put_ue(0); // log2_max_frame_num_minus4
        w.put_ue(0); // pic_order_cnt_type
        w.put_ue(0); // log2_max_pic_order_cnt_lsb_minus4
        w.put_ue(1); // max_num_ref_frames
        w.put_bits(0, 1); // gaps_in_frame_num_value_allowed
        w.put_ue(width_mbs - 1);
        w.put_ue(height_mbs - 1);
        w.put_bits(1, 1); // frame_mbs_only_flag
        w.put_bits(1, 1); // direct_8x8_inference_flag
        match crop {
            Some((left, right, top, bottom)) => {
                w.put_bits(1, 1); // frame_cropping_flag
                w.put_ue(left);
                w.put_ue(right);
                w.put_ue(top);
                w.put_ue(bottom);
            }
            None => w.put_bits(0, 1),
        }
        w.put_bits(0, 1); // vui_parameters_present_flag

        let mut sps = vec![0x67];
        sps.extend(w.finish());
        sps
    }

    fn synthetic_sps(width_mbs: u64, height_mbs: u64) -> Vec<u8> {
        build_sps(width_mbs, height_mbs, None)
    }

    fn annexb(nals: &[&[u8]]) -> Bytes {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out.into()
    }

    fn keyframe(pts_ms: u64) -> VideoSample {
        let sps = synthetic_sps(80, 45); // 1280x720
        let pps = vec![0x68, 0xCE, 0x3C, 0x80];
        let idr = vec![0x65, 0x88, 0x84, 0x00];
        VideoSample {
            data: annexb(&[&sps, &pps, &idr]),
            pts: Duration::from_millis(pts_ms),
            is_keyframe: true,
        }
    }

    fn delta_frame(pts_ms: u64) -> VideoSample {
        VideoSample {
            data: annexb(&[&[0x41, 0x9A, 0x02]]),
            pts: Duration::from_millis(pts_ms),
            is_keyframe: false,
        }
    }

    #[test]
    fn test_parse_sps_dimensions() {
        let sps = synthetic_sps(80, 45);
        assert_eq!(parse_sps_dimensions(&sps), Some((1280, 720)));

        let sps = synthetic_sps(40, 30);
        assert_eq!(parse_sps_dimensions(&sps), Some((640, 480)));
    }

    #[test]
    fn test_parse_sps_applies_cropping_window() {
        // 120x68 macroblocks cropped to 1920x1080 (crop unit 2 vertically).
        let sps = build_sps(120, 68, Some((0, 0, 0, 4)));
        assert_eq!(parse_sps_dimensions(&sps), Some((1920, 1080)));
    }

    #[test]
    fn test_parse_sps_rejects_garbage() {
        assert_eq!(parse_sps_dimensions(&[0x67]), None);
        assert_eq!(parse_sps_dimensions(&[]), None);
    }

    #[test]
    fn test_parse_sps_rejects_oversized_crop() {
        // A crop window wider than the coded picture must not underflow.
        let sps = build_sps(80, 45, Some((1_000_000, 0, 0, 0)));
        assert_eq!(parse_sps_dimensions(&sps), None);

        let sps = build_sps(80, 45, Some((0, 0, 1_000_000, 1_000_000)));
        assert_eq!(parse_sps_dimensions(&sps), None);
    }

    #[test]
    fn test_recorder_waits_for_keyframe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut recorder = Mp4Recorder::new(&path);

        recorder.write_video(&delta_frame(0)).unwrap();
        recorder.write_video(&delta_frame(33)).unwrap();
        assert!(!path.exists(), "no file before the first keyframe");

        recorder.finalize().unwrap();
        assert_eq!(recorder.sample_count(), 0);
    }

    #[test]
    fn test_recorder_writes_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut recorder = Mp4Recorder::new(&path);

        recorder.write_video(&keyframe(0)).unwrap();
        recorder.write_video(&delta_frame(33)).unwrap();
        recorder.write_video(&delta_frame(66)).unwrap();
        recorder.finalize().unwrap();

        assert_eq!(recorder.sample_count(), 3);
        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() > 0);

        // The finalized file must parse as MP4 with one video track.
        let file = std::fs::File::open(&path).unwrap();
        let size = file.metadata().unwrap().len();
        let reader = mp4::Mp4Reader::read_header(std::io::BufReader::new(file), size).unwrap();
        assert_eq!(reader.tracks().len(), 1);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut recorder = Mp4Recorder::new(&path);

        recorder.write_video(&keyframe(0)).unwrap();
        recorder.finalize().unwrap();
        recorder.finalize().unwrap();
        assert_eq!(recorder.sample_count(), 1);
    }

    #[test]
    fn test_keyframe_marks_sync_sample() {
        let sample = keyframe(0);
        assert!(crate::media::h264::nal_units(&sample.data)
            .any(|nal| crate::media::h264::nal_type(nal) == Some(NAL_IDR)));
    }
}
