//! Property-Based Tests for Stripe Geometry
//!
//! Systematically verifies the stripe/section arithmetic across payload
//! sizes, shard configurations, and read windows.
//!
//! # Test Properties
//!
//! 1. **Size bounds**: S·D·(C−1) ≤ size ≤ S·D·(C−1) + L·D
//! 2. **Shard object size**: independent of any read window
//! 3. **Section containment**: sections stay within the shard file
//! 4. **Skip bound**: bytes_to_skip is always less than one stripe's payload

#![cfg(test)]

use proptest::prelude::*;

use super::geometry::StripeGeometry;

// =============================================================================
// Property Strategies
// =============================================================================

/// Valid (data, parity) configurations: D ≥ 2, P ≥ 1.
fn shard_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (2usize..=6, 1usize..=4)
}

/// Payload sizes from empty through several stripes.
fn object_size_strategy() -> impl Strategy<Value = u64> {
    0u64..200_000
}

/// Configured shard sizes.
fn shard_size_strategy() -> impl Strategy<Value = usize> {
    64usize..4096
}

// =============================================================================
// Geometry Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_size_bounds(
        (data_count, parity_count) in shard_config_strategy(),
        object_size in object_size_strategy(),
        shard_size in shard_size_strategy(),
    ) {
        let g = StripeGeometry::compute(object_size, data_count, parity_count, shard_size);

        let lower = g.shard_size as u64 * data_count as u64 * (g.stripe_count as u64 - 1);
        let upper = lower + g.last_shard_size as u64 * data_count as u64;

        prop_assert!(lower <= object_size);
        prop_assert!(object_size <= upper);
    }

    #[test]
    fn prop_shard_object_size_covers_payload(
        (data_count, parity_count) in shard_config_strategy(),
        object_size in object_size_strategy(),
        shard_size in shard_size_strategy(),
    ) {
        let g = StripeGeometry::compute(object_size, data_count, parity_count, shard_size);

        // D shard files together must hold at least the payload.
        prop_assert!(g.shard_object_size() * data_count as u64 >= object_size);
    }

    #[test]
    fn prop_section_stays_within_shard_file(
        (data_count, parity_count) in shard_config_strategy(),
        object_size in object_size_strategy(),
        shard_size in shard_size_strategy(),
        offset in 0u64..250_000,
        length in 0u64..250_000,
    ) {
        let g = StripeGeometry::compute(object_size, data_count, parity_count, shard_size);
        let s = g.section(offset, length);

        prop_assert!(s.shard_offset + s.shard_length <= g.shard_object_size());
    }

    #[test]
    fn prop_section_covers_window(
        (data_count, parity_count) in shard_config_strategy(),
        object_size in 1u64..200_000,
        shard_size in shard_size_strategy(),
        offset_frac in 0.0f64..1.0,
        length_frac in 0.0f64..1.0,
    ) {
        let offset = (object_size as f64 * offset_frac) as u64;
        let length = 1 + ((object_size - offset.min(object_size - 1)) as f64 * length_frac) as u64;

        let g = StripeGeometry::compute(object_size, data_count, parity_count, shard_size);
        let s = g.section(offset, length);

        let clamped = length.min(object_size - offset);
        if clamped > 0 {
            // The stripes selected must carry at least skip + clamped payload
            // bytes.
            let per_stripe = g.shard_size as u64 * data_count as u64;
            let last_stripe_payload = g.last_shard_size as u64 * data_count as u64;
            let mut carried = 0u64;
            for i in 0..s.stripe_count {
                let whole_index = s.shard_offset / g.shard_size.max(1) as u64 + i as u64;
                if whole_index == g.stripe_count as u64 - 1 {
                    carried += last_stripe_payload;
                } else {
                    carried += per_stripe;
                }
            }
            prop_assert!(carried >= s.bytes_to_skip as u64 + clamped,
                "carried {} < skip {} + len {}", carried, s.bytes_to_skip, clamped);
        }

        prop_assert!(s.bytes_to_skip < (g.shard_size.max(1) * data_count) as usize + 1);
    }
}
