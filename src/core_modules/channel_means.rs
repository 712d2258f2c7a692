// THEORY:
// `ChannelMeans` is the spatial pooling step of the photometric layer. A night
// photograph holds millions of samples, but the sky-brightness model only ever
// sees three numbers: the average normalized intensity of the red, green and
// blue channels over the whole frame.
//
// Key principles:
// 1.  **Exact accumulation**: integer samples are summed as `f64`, which is exact
//     for any realistic frame size, and only divided once at the end. A pure
//     white frame therefore averages to exactly 1.0.
// 2.  **Depth agnostic**: the caller says what the maximum representable sample
//     value is (255 for 8-bit, 65535 for 16-bit, 1.0 for float data). The means
//     are always returned in [0, 1].
// 3.  **Dumb container**: it knows how to summarize interleaved RGB samples, and
//     nothing about logarithms, luminance or the model.

pub mod channel_means {
    /// Average normalized intensity of each RGB channel, in [0, 1].
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct ChannelMeans {
        pub red: f64,
        pub green: f64,
        pub blue: f64,
        /// Number of pixels that contributed to the means.
        pub pixel_count: usize,
    }

    impl ChannelMeans {
        /// Averages interleaved `R, G, B` samples.
        ///
        /// Returns `None` when there is not a single complete pixel.
        pub fn from_interleaved<T: Copy>(
            samples: &[T],
            max_value: f64,
            to_f64: impl Fn(T) -> f64,
        ) -> Option<Self> {
            let pixel_count = samples.len() / 3;
            if pixel_count == 0 {
                return None;
            }

            // Row-sized blocks keep the accumulators in registers.
            const BLOCK: usize = 3 * 64;
            let mut sum_r = 0f64;
            let mut sum_g = 0f64;
            let mut sum_b = 0f64;

            for block in samples[..pixel_count * 3].chunks(BLOCK) {
                for pixel in block.chunks_exact(3) {
                    sum_r += to_f64(pixel[0]);
                    sum_g += to_f64(pixel[1]);
                    sum_b += to_f64(pixel[2]);
                }
            }

            let n = pixel_count as f64;
            Some(Self {
                red: sum_r / n / max_value,
                green: sum_g / n / max_value,
                blue: sum_b / n / max_value,
                pixel_count,
            })
        }
    }
}
