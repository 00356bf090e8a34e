//! H.264 RTP depacketization (RFC 6184) and NAL unit helpers
//!
//! `webrtc-rs` hands back raw RTP payloads, not depacketized frames: H.264
//! arrives as single NAL units, STAP-A aggregates and FU-A fragments. The
//! depacketizer reassembles those into Annex-B access units, emitting one
//! buffer per RTP timestamp (frame boundary on marker bit or timestamp
//! change).

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type for a non-IDR coded slice
pub const NAL_SLICE: u8 = 1;
/// NAL unit type for an IDR coded slice (keyframe)
pub const NAL_IDR: u8 = 5;
/// NAL unit type for a sequence parameter set
pub const NAL_SPS: u8 = 7;
/// NAL unit type for a picture parameter set
pub const NAL_PPS: u8 = 8;

/// Stateful H.264 RTP payload reassembler
pub struct H264Depacketizer {
    /// Accumulates NAL units of the current access unit, Annex-B framed
    frame_buffer: Vec<u8>,
    /// Accumulates FU-A fragments of one NAL unit
    fu_buffer: Vec<u8>,
    /// Whether an FU-A reassembly is in progress
    in_fu: bool,
    /// RTP timestamp of the access unit being assembled
    last_timestamp: u32,
}

impl H264Depacketizer {
    /// Create an empty depacketizer
    pub fn new() -> Self {
        Self {
            frame_buffer: Vec::with_capacity(512 * 1024),
            fu_buffer: Vec::with_capacity(128 * 1024),
            in_fu: false,
            last_timestamp: 0,
        }
    }

    /// Feed one RTP payload; returns a complete Annex-B access unit and the
    /// RTP timestamp it belongs to. The frame boundary is the marker bit,
    /// with a timestamp change as fallback for senders that never set it —
    /// a frame flushed by that fallback carries its own timestamp, not the
    /// one of the packet that triggered the flush.
    pub fn push(&mut self, payload: &[u8], timestamp: u32, marker: bool) -> Option<(Vec<u8>, u32)> {
        if payload.is_empty() {
            return None;
        }

        if timestamp != self.last_timestamp && !self.frame_buffer.is_empty() {
            let frame = std::mem::take(&mut self.frame_buffer);
            let frame_timestamp = self.last_timestamp;
            self.last_timestamp = timestamp;
            self.in_fu = false;
            self.fu_buffer.clear();

            self.push_payload(payload);
            return Some((frame, frame_timestamp));
        }

        self.last_timestamp = timestamp;
        self.push_payload(payload);

        if marker && !self.frame_buffer.is_empty() {
            return Some((std::mem::take(&mut self.frame_buffer), timestamp));
        }

        None
    }

    fn push_payload(&mut self, payload: &[u8]) {
        let first_byte = payload[0];
        let nal_type = first_byte & 0x1F;

        match nal_type {
            // Single NAL unit packet
            1..=23 => self.push_nal(payload),
            // STAP-A aggregation packet
            24 => self.push_stap_a(&payload[1..]),
            // FU-A fragmentation unit
            28 => {
                if payload.len() >= 2 {
                    self.push_fu_a(first_byte, payload[1], &payload[2..]);
                }
            }
            // FU-B carries a 2-byte DON before the fragment data
            29 => {
                if payload.len() >= 4 {
                    self.push_fu_a(first_byte, payload[1], &payload[4..]);
                }
            }
            _ => self.push_nal(payload),
        }
    }

    fn push_nal(&mut self, nal: &[u8]) {
        self.frame_buffer.extend_from_slice(&START_CODE);
        self.frame_buffer.extend_from_slice(nal);
    }

    fn push_stap_a(&mut self, mut data: &[u8]) {
        while data.len() >= 2 {
            let nal_size = usize::from(u16::from_be_bytes([data[0], data[1]]));
            data = &data[2..];
            if nal_size == 0 || nal_size > data.len() {
                break;
            }
            let (nal, rest) = data.split_at(nal_size);
            self.push_nal(nal);
            data = rest;
        }
    }

    fn push_fu_a(&mut self, fu_indicator: u8, fu_header: u8, fragment: &[u8]) {
        let start_bit = fu_header & 0x80 != 0;
        let end_bit = fu_header & 0x40 != 0;
        let nal_type = fu_header & 0x1F;

        if start_bit {
            self.fu_buffer.clear();
            // Rebuild the NAL header from the indicator's NRI bits.
            self.fu_buffer.push((fu_indicator & 0xE0) | nal_type);
            self.in_fu = true;
        }

        if self.in_fu {
            self.fu_buffer.extend_from_slice(fragment);

            if end_bit {
                let nal = std::mem::take(&mut self.fu_buffer);
                self.push_nal(&nal);
                self.in_fu = false;
            }
        }
    }
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterate over the NAL units of an Annex-B buffer (3- or 4-byte start codes)
pub fn nal_units(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                starts.push((i, i + 3));
                i += 3;
                continue;
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                starts.push((i, i + 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }

    let mut units = Vec::with_capacity(starts.len());
    for (idx, &(_, begin)) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).map(|&(next, _)| next).unwrap_or(data.len());
        if begin < end {
            units.push(&data[begin..end]);
        }
    }
    units.into_iter()
}

/// NAL unit type of a single NAL unit buffer
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// Whether an Annex-B access unit contains an IDR slice
pub fn contains_keyframe(access_unit: &[u8]) -> bool {
    nal_units(access_unit).any(|nal| nal_type(nal) == Some(NAL_IDR))
}

/// Extract the first SPS and PPS NAL units from an Annex-B access unit
pub fn extract_parameter_sets(access_unit: &[u8]) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let mut sps = None;
    let mut pps = None;
    for nal in nal_units(access_unit) {
        match nal_type(nal) {
            Some(NAL_SPS) if sps.is_none() => sps = Some(nal.to_vec()),
            Some(NAL_PPS) if pps.is_none() => pps = Some(nal.to_vec()),
            _ => {}
        }
    }
    (sps, pps)
}

/// Convert an Annex-B access unit to AVCC (4-byte length prefixed) framing,
/// the sample format MP4 tracks require
pub fn annexb_to_avcc(access_unit: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(access_unit.len());
    for nal in nal_units(access_unit) {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}
