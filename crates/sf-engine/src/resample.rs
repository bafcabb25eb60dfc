//! Linear resampling, channel up/down-mix and additive mixing
//!
//! No anti-aliasing filter: clip and mixer rates are normally close, and the
//! export path needs bit-reproducible output more than it needs fidelity.

/// Resample interleaved `input` to `output_frames` frames.
///
/// Output frame `i` maps to source position `i / (out - 1) * (in - 1)` and is
/// interpolated between the two bracketing source frames. Output channels the
/// input lacks are zero-filled; input channels beyond `output_channels` are dropped.
pub fn resample_linear(
    input: &[f32],
    input_channels: usize,
    output_frames: usize,
    output_channels: usize,
) -> Vec<f32> {
    let mut output = vec![0.0f32; output_frames * output_channels];
    if input_channels == 0 || output_channels == 0 || output_frames == 0 {
        return output;
    }

    let input_frames = input.len() / input_channels;
    if input_frames == 0 {
        return output;
    }

    let shared = input_channels.min(output_channels);
    let sample = |frame: usize, ch: usize| input[frame * input_channels + ch];

    for i in 0..output_frames {
        let src_pos = if output_frames > 1 {
            i as f64 / (output_frames - 1) as f64 * (input_frames - 1) as f64
        } else {
            0.0
        };
        let index = (src_pos.floor() as usize).min(input_frames - 1);
        let next = (index + 1).min(input_frames - 1);
        let frac = (src_pos - index as f64) as f32;

        let out = &mut output[i * output_channels..(i + 1) * output_channels];
        for (ch, out) in out.iter_mut().enumerate().take(shared) {
            let a = sample(index, ch);
            let b = sample(next, ch);
            *out = a + (b - a) * frac;
        }
    }

    output
}

/// `output[i] += contribution[i] * gain` over the common length
#[inline]
pub fn mix_into(output: &mut [f32], contribution: &[f32], gain: f32) {
    for (out, &s) in output.iter_mut().zip(contribution) {
        *out += s * gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_same_length_is_identity() {
        let input: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin()).collect();
        let output = resample_linear(&input, 2, 32, 2);
        assert_eq!(output.len(), input.len());
        for (a, b) in input.iter().zip(output.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_upsample_interpolates() {
        let output = resample_linear(&[0.0, 1.0], 1, 3, 1);
        assert_eq!(output, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_downsample_hits_endpoints() {
        let input: Vec<f32> = (0..5).map(|i| i as f32).collect();
        let output = resample_linear(&input, 1, 3, 1);
        assert_eq!(output, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_mono_to_stereo_zero_fills() {
        let output = resample_linear(&[0.1, 0.2, 0.3], 1, 3, 2);
        assert_eq!(output, vec![0.1, 0.0, 0.2, 0.0, 0.3, 0.0]);
    }

    #[test]
    fn test_stereo_to_mono_drops_right() {
        let output = resample_linear(&[0.1, 9.0, 0.2, 9.0, 0.3, 9.0], 2, 3, 1);
        assert_eq!(output, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_single_output_frame_takes_first_input() {
        assert_eq!(resample_linear(&[0.7, 0.2, 0.9], 1, 1, 1), vec![0.7]);
        assert_eq!(resample_linear(&[], 1, 4, 1), vec![0.0; 4]);
    }

    #[test]
    fn test_mix_order_independent() {
        let a: Vec<f32> = (0..16).map(|i| i as f32 * 0.1).collect();
        let b: Vec<f32> = (0..16).map(|i| 1.0 - i as f32 * 0.03).collect();

        let mut ab = vec![0.0; 16];
        mix_into(&mut ab, &a, 0.8);
        mix_into(&mut ab, &b, 0.5);

        let mut ba = vec![0.0; 16];
        mix_into(&mut ba, &b, 0.5);
        mix_into(&mut ba, &a, 0.8);

        for (x, y) in ab.iter().zip(ba.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_mix_does_not_limit() {
        let mut out = vec![0.9; 4];
        mix_into(&mut out, &[0.9; 4], 1.0);
        assert_relative_eq!(out[0], 1.8);
    }
}
