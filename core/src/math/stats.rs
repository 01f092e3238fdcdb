use num_complex::Complex32;

pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(values: &[f32]) -> f32 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f32>() / values.len() as f32
    }

    /// Median of a copy of `values`; the mean of the two middle values for
    /// even lengths.
    pub fn median(values: &[f32]) -> f32 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            0.5 * (sorted[mid - 1] + sorted[mid])
        } else {
            sorted[mid]
        }
    }

    /// Removes the complex mean in place. ADC samples carry a fixed bias.
    pub fn subtract_mean(series: &mut [Complex32]) {
        if series.is_empty() {
            return;
        }
        let mean = series.iter().sum::<Complex32>() / series.len() as f32;
        for value in series.iter_mut() {
            *value -= mean;
        }
    }

    pub fn power(series: &[Complex32]) -> f32 {
        series.iter().map(|c| c.norm_sqr()).sum()
    }

    pub fn to_db(value: f32) -> f32 {
        10.0 * value.log10()
    }
}
