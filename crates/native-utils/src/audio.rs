use anyhow::Result;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Creates a resampler converting `from` Hz to `to` Hz in fixed-size chunks
/// of mono samples.
pub fn create_resampler(from: f64, to: f64, chunk_size: usize) -> Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(to / from, 1.0, PolynomialDegree::Cubic, chunk_size, 1)?;
    Ok(resampler)
}

/// Resamples a whole clip in one call. The tail chunk is zero-padded, so the
/// output may carry up to one chunk of trailing silence.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to {
        return Ok(samples.to_vec());
    }
    const CHUNK_SIZE: usize = 1024;
    let mut resampler = create_resampler(from as f64, to as f64, CHUNK_SIZE)?;
    let mut out = Vec::with_capacity(samples.len() * to as usize / from as usize + CHUNK_SIZE);
    for chunk in split_for_chunks(samples, CHUNK_SIZE) {
        let frames = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(mono) = frames.first() {
            out.extend_from_slice(mono);
        }
    }
    Ok(out)
}

/// Splits samples into fixed-size chunks, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Creates the heap ring buffer shared between the playback producer and the
/// output-stream callback. `capacity` is in samples.
pub fn playback_buffer(capacity: usize) -> HeapRb<f32> {
    HeapRb::new(capacity)
}

/// Averages interleaved multichannel frames down to mono.
pub fn mixdown(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Interprets little-endian PCM16 bytes as normalized f32 samples.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Converts f32 samples to little-endian PCM16 bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Encodes mono f32 samples as a 16-bit WAV file in memory, the format the
/// transcription endpoint accepts.
pub fn wav_bytes(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        let v = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer.write_sample(v)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// RMS energy of a run of samples, for silence checks.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
