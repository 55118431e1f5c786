//! Small array statistics used by samplers and stamp preparation

use ndarray::ArrayView1;

/// Index of the maximum element, NaN values never win
pub fn argmax(arr: ArrayView1<f64>) -> Option<usize> {
    if arr.is_empty() {
        return None;
    }

    let (idx, _) = arr
        .iter()
        .enumerate()
        .fold((0, f64::NAN), |(max_idx, max_val), (idx, &val)| {
            if val > max_val || (max_val.is_nan() && !val.is_nan()) {
                (idx, val)
            } else {
                (max_idx, max_val)
            }
        });

    Some(idx)
}

/// `ln(exp(a) + exp(b))` without overflow
pub fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // both infinite with the same sign or NaN
        diff
    }
}

/// `ln(sum(exp(x)))`, negative infinity for an empty input
pub fn logsumexp<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    let values: Vec<f64> = values.into_iter().copied().collect();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|&x| (x - max).exp()).sum::<f64>().ln()
}

/// Median of the finite values, `None` if there are none
pub fn nan_median<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<f64> {
    let mut finite: Vec<f64> = values.into_iter().copied().filter(|x| x.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_unstable_by(f64::total_cmp);
    let i = (finite.len() - 1) / 2;
    if finite.len() % 2 == 0 {
        Some(0.5 * (finite[i] + finite[i + 1]))
    } else {
        Some(finite[i])
    }
}

/// Kish effective sample size of normalized-or-not log-weights
pub fn effective_sample_size(ln_weights: ArrayView1<f64>) -> f64 {
    let ln_sum = logsumexp(ln_weights.iter());
    let ln_sum2 = logsumexp(ln_weights.mapv(|w| 2.0 * w).iter());
    (2.0 * ln_sum - ln_sum2).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn test_argmax_basic() {
        let arr = Array1::from(vec![1.0f64, 3.0, 2.0, 5.0, 4.0]);
        assert_eq!(argmax(arr.view()), Some(3));
    }

    #[test]
    fn test_argmax_skips_nan() {
        let arr = array![f64::NAN, 1.0, f64::NAN, -2.0];
        assert_eq!(argmax(arr.view()), Some(1));
        assert_eq!(argmax(Array1::<f64>::zeros(0).view()), None);
    }

    #[test]
    fn test_logaddexp() {
        assert_abs_diff_eq!(logaddexp(0.0, 0.0), 2f64.ln());
        assert_abs_diff_eq!(logaddexp(1000.0, 0.0), 1000.0);
        assert_abs_diff_eq!(
            logaddexp(f64::NEG_INFINITY, -1.5),
            -1.5,
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_logsumexp() {
        let values = [1.0_f64.ln(), 2.0_f64.ln(), 3.0_f64.ln()];
        assert_abs_diff_eq!(logsumexp(values.iter()), 6.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(logsumexp(std::iter::empty()), f64::NEG_INFINITY);
    }

    #[test]
    fn test_nan_median() {
        assert_eq!(nan_median([3.0, f64::NAN, 1.0, 2.0].iter()), Some(2.0));
        assert_eq!(nan_median([4.0, 1.0, 3.0, 2.0].iter()), Some(2.5));
        assert_eq!(nan_median([f64::NAN].iter()), None);
    }

    #[test]
    fn test_effective_sample_size() {
        let equal = Array1::from_elem(10, -3.0);
        assert_abs_diff_eq!(effective_sample_size(equal.view()), 10.0, epsilon = 1e-9);
        let single = array![0.0, f64::NEG_INFINITY, f64::NEG_INFINITY];
        assert_abs_diff_eq!(effective_sample_size(single.view()), 1.0, epsilon = 1e-12);
    }
}
