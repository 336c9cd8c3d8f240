/// Round `x` to `decimals` decimal places.
pub fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (x * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.312_930_28, 4, 0.3129)]
    #[case(33.333_333, 2, 33.33)]
    #[case(-223.21, 0, -223.0)]
    #[case(2.5, 0, 3.0)]
    fn rounds_half_away_from_zero(#[case] x: f64, #[case] decimals: i32, #[case] expected: f64) {
        assert_eq!(round_to(x, decimals), expected);
    }
}
