use proptest::prelude::*;

// Property-based checks for bucketing, reward and aggregation invariants.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{bucket_key, Axis, BucketKey};
    use crate::config::RewardConfig;
    use crate::domain::{Episode, FieldState, IntensityBin, Tone};
    use crate::policy_table::PolicyTable;
    use crate::recorder::LogSnapshot;
    use crate::reward::compute_reward;

    fn unit() -> impl Strategy<Value = f64> {
        0.0f64..=1.0
    }

    fn tone() -> impl Strategy<Value = Tone> {
        prop_oneof![Just(Tone::Warm), Just(Tone::Cool), Just(Tone::Neutral)]
    }

    // =========================================================================
    // Bucketing
    // =========================================================================
    proptest! {
        #[test]
        fn test_bucket_key_is_deterministic(
            ts in 0i64..4_102_444_800_000i64,
            connected in 0u32..500,
            p in unit(), a in unit(), d in unit(),
        ) {
            let pad = [p, a, d];
            let k1 = bucket_key(ts, connected, &pad);
            let k2 = bucket_key(ts, connected, &pad);
            prop_assert_eq!(&k1, &k2);

            let parsed = BucketKey::parse(k1.as_str()).unwrap();
            prop_assert_eq!(&parsed, &k1);
            let parts = k1.parts().unwrap();
            prop_assert!(parts.hour < 24);
            prop_assert_eq!(k1.as_str().len(), 6);
        }

        #[test]
        fn test_equal_axes_resolve_to_pleasure(v in unit()) {
            prop_assert_eq!(Axis::dominant(&[v, v, v]), Axis::P);
        }

        #[test]
        fn test_bin_midpoint_stays_in_bin(x in unit()) {
            let bin = IntensityBin::from_intensity(x);
            prop_assert_eq!(IntensityBin::from_intensity(bin.midpoint()), bin);
        }
    }

    // =========================================================================
    // Reward sign
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_improving_field_rewards_positively(
            pre_c in 0.0f64..0.9,
            dc in 0.01f64..0.1,
            pre_e in 0.1f64..1.0,
            de in 0.0f64..0.1,
        ) {
            let post_e = (pre_e - de).max(0.0);
            let pre = FieldState::new([0.5; 3], pre_e, pre_c, 10, 0);
            let post = FieldState::new([0.5; 3], post_e, pre_c + dc, 10, 1_000);
            prop_assert!(compute_reward(&pre, &post, &RewardConfig::default()) > 0.0);
            prop_assert!(compute_reward(&post, &pre, &RewardConfig::default()) < 0.0);
        }

        #[test]
        fn test_clip_bounds_reward(
            c1 in unit(), c2 in unit(), e1 in unit(), e2 in unit(), bound in 0.05f64..1.0,
        ) {
            let cfg = RewardConfig { entropy_scale: 1.0, clip: Some(bound) };
            let pre = FieldState::new([0.5; 3], e1, c1, 10, 0);
            let post = FieldState::new([0.5; 3], e2, c2, 10, 1);
            prop_assert!(compute_reward(&pre, &post, &cfg).abs() <= bound);
        }
    }

    // =========================================================================
    // Aggregation
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_aggregation_is_idempotent(
            samples in prop::collection::vec((tone(), unit(), -1.0f64..1.0), 1..60),
        ) {
            let state = FieldState::new([0.3, 0.7, 0.2], 0.5, 0.5, 45, 1_704_119_400_000);
            let bucket = BucketKey::parse("14-M-A").unwrap();
            let episodes: Vec<Episode> = samples
                .iter()
                .map(|&(tone, intensity, reward)| Episode {
                    recorded_at_ms: state.ts_ms + 1,
                    connected: 45,
                    tone,
                    intensity,
                    intensity_bin: IntensityBin::from_intensity(intensity),
                    pre: state,
                    post: FieldState { ts_ms: state.ts_ms + 1, ..state },
                    elapsed_ms: 1,
                    bucket_key: bucket.clone(),
                    reward,
                })
                .collect();

            let log = LogSnapshot { first_seq: 0, episodes: episodes.clone() };
            let (first, s1) = PolicyTable::new().aggregate(&log, 10);
            let (second, s2) = first.aggregate(&log, 20);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(s1.buckets_updated, 1);
            prop_assert_eq!(s2.buckets_updated, 0);

            let total: u64 = first.iter().map(|e| e.n).sum();
            prop_assert_eq!(total as usize, episodes.len());
            for entry in first.iter() {
                prop_assert!(entry.reward_avg.is_finite());
                prop_assert!(entry.n >= 1);
            }
        }
    }
}
