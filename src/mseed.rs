//! A small, self-contained MiniSEED (SEED volume, fixed-length data records) encoder.
//!
//! The corpus this daemon was grounded on has no MiniSEED crate to delegate to, so this
//! module plays that role directly: it accepts per-trace metadata and a sample vector,
//! the same shape the design calls for, and writes standards-conformant records using
//! encoding format 4 (32-bit IEEE float, the natural fit for the integer-to-float sample
//! data this daemon produces). Records are fixed at 512 bytes, split across as many
//! records as a trace's sample count requires.

use std::io::{self, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const RECORD_LEN: usize = 512;
const FIXED_HEADER_LEN: usize = 48;
const BLOCKETTE_1000_LEN: usize = 8;
const DATA_OFFSET: usize = FIXED_HEADER_LEN + BLOCKETTE_1000_LEN; // 56
const SAMPLES_PER_RECORD: usize = (RECORD_LEN - DATA_OFFSET) / 4;

pub struct Trace {
    pub network: String,
    pub station: String,
    pub channel: String,
    pub location: String,
    /// Seconds since the Unix epoch.
    pub start_time: f64,
    pub sampling_rate: f64,
    pub data: Vec<f32>,
}

fn pad_ascii(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    for b in &mut buf[n..] {
        *b = b' ';
    }
}

fn btime(epoch_secs: f64) -> (u16, u16, u8, u8, u8, u16) {
    let secs = epoch_secs.floor() as i64;
    let frac = epoch_secs - epoch_secs.floor();
    let when = UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
    let (year, day_of_year, hour, min, sec) = civil_from_unix(when);
    let fract_1e4 = (frac * 10_000.0).round() as u16;
    (year, day_of_year, hour, min, sec, fract_1e4)
}

/// Minimal, dependency-free UTC calendar breakdown (no leap seconds), used only to fill
/// the SEED fixed header's `BTIME` fields.
fn civil_from_unix(when: SystemTime) -> (u16, u16, u8, u8, u8) {
    let total_secs = when
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64;
    let days = total_secs.div_euclid(86_400);
    let secs_of_day = total_secs.rem_euclid(86_400);
    let hour = (secs_of_day / 3600) as u8;
    let min = ((secs_of_day % 3600) / 60) as u8;
    let sec = (secs_of_day % 60) as u8;

    // Civil-from-days algorithm (Howard Hinnant), proleptic Gregorian, epoch 1970-01-01.
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as i64; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365; // [0, 399]
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let day = doy - (153 * mp + 2) / 5 + 1; // [1, 31]
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };

    let is_leap = |y: i64| (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;
    const CUM_DAYS: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
    let mut day_of_year = CUM_DAYS[(month - 1) as usize] + day;
    if month > 2 && is_leap(year) {
        day_of_year += 1;
    }

    (year as u16, day_of_year as u16, hour, min, sec)
}

pub fn write_stream<W: Write>(traces: &[Trace], out: &mut W) -> io::Result<()> {
    let mut seq: u32 = 1;
    for trace in traces {
        if trace.data.is_empty() {
            continue;
        }
        for chunk in trace.data.chunks(SAMPLES_PER_RECORD) {
            write_record(out, trace, seq, chunk)?;
            seq += 1;
        }
    }
    Ok(())
}

fn write_record<W: Write>(out: &mut W, trace: &Trace, seq: u32, samples: &[f32]) -> io::Result<()> {
    let mut record = [0u8; RECORD_LEN];

    // Fixed section data header (48 bytes), big-endian per the SEED standard.
    let seq_str = format!("{:06}", seq % 1_000_000);
    record[0..6].copy_from_slice(seq_str.as_bytes());
    record[6] = b'D';
    record[7] = b' ';
    pad_ascii(&mut record[8..13], &trace.station);
    pad_ascii(&mut record[13..15], &trace.location);
    pad_ascii(&mut record[15..18], &trace.channel);
    pad_ascii(&mut record[18..20], &trace.network);

    let (year, day_of_year, hour, min, sec, fract_1e4) = btime(trace.start_time);
    record[20..22].copy_from_slice(&year.to_be_bytes());
    record[22..24].copy_from_slice(&day_of_year.to_be_bytes());
    record[24] = hour;
    record[25] = min;
    record[26] = sec;
    record[27] = 0; // unused
    record[28..30].copy_from_slice(&fract_1e4.to_be_bytes());

    record[30..32].copy_from_slice(&(samples.len() as u16).to_be_bytes());

    let (rate_factor, rate_multiplier) = sample_rate_factors(trace.sampling_rate);
    record[32..34].copy_from_slice(&rate_factor.to_be_bytes());
    record[34..36].copy_from_slice(&rate_multiplier.to_be_bytes());

    record[36] = 0; // activity flags
    record[37] = 0; // I/O flags
    record[38] = 0; // data quality flags
    record[39] = 1; // one blockette follows
    record[40..44].copy_from_slice(&0i32.to_be_bytes()); // time correction
    record[44..46].copy_from_slice(&(DATA_OFFSET as u16).to_be_bytes());
    record[46..48].copy_from_slice(&(FIXED_HEADER_LEN as u16).to_be_bytes());

    // Blockette 1000: data-only SEED blockette, encoding format 4 (32-bit float), big-endian.
    record[48..50].copy_from_slice(&1000u16.to_be_bytes());
    record[50..52].copy_from_slice(&0u16.to_be_bytes()); // no next blockette
    record[52] = 4; // encoding format: IEEE float32
    record[53] = 1; // word order: big-endian
    record[54] = (RECORD_LEN as f64).log2() as u8; // record length exponent (512 = 2^9)
    record[55] = 0; // reserved

    for (i, sample) in samples.iter().enumerate() {
        let offset = DATA_OFFSET + i * 4;
        record[offset..offset + 4].copy_from_slice(&sample.to_be_bytes());
    }

    out.write_all(&record)
}

/// SEED encodes sample rate as a factor/multiplier pair rather than a float. A positive
/// factor means samples/second directly; this daemon only ever has rational, usually
/// integer, sampling rates, so the direct form is always sufficient.
fn sample_rate_factors(sampling_rate: f64) -> (i16, i16) {
    (sampling_rate.round() as i16, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_short_trace_fits_one_record() {
        let trace = Trace {
            network: "XX".into(),
            station: "RPI3".into(),
            channel: "EHZ".into(),
            location: "".into(),
            start_time: 1_700_000_000.0,
            sampling_rate: 100.0,
            data: vec![1.0, 2.0, 3.0],
        };
        let mut buf = Vec::new();
        write_stream(&[trace], &mut buf).unwrap();
        assert_eq!(buf.len(), RECORD_LEN);
        assert_eq!(&buf[6..7], b"D");
        assert_eq!(&buf[18..20], b"XX");
        // Blockette 1000 marker.
        assert_eq!(u16::from_be_bytes([buf[48], buf[49]]), 1000);
    }

    #[test]
    fn long_trace_splits_across_multiple_records() {
        let n = SAMPLES_PER_RECORD * 3 + 5;
        let trace = Trace {
            network: "XX".into(),
            station: "RPI3".into(),
            channel: "EHZ".into(),
            location: "".into(),
            start_time: 0.0,
            sampling_rate: 100.0,
            data: vec![0.0; n],
        };
        let mut buf = Vec::new();
        write_stream(&[trace], &mut buf).unwrap();
        assert_eq!(buf.len() % RECORD_LEN, 0);
        assert_eq!(buf.len() / RECORD_LEN, 4);
    }

    #[test]
    fn empty_trace_is_skipped() {
        let trace = Trace {
            network: "XX".into(),
            station: "RPI3".into(),
            channel: "EHZ".into(),
            location: "".into(),
            start_time: 0.0,
            sampling_rate: 100.0,
            data: vec![],
        };
        let mut buf = Vec::new();
        write_stream(&[trace], &mut buf).unwrap();
        assert!(buf.is_empty());
    }
}
