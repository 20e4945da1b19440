//! Product arrival generation.
//!
//! Stochastic sources sample a weekly volume per variant and convert it into
//! an inter-lot cycle time; scheduled sources replay a fixed delivery list.
//! Actual product instantiation and incoming-storage placement live in the
//! engine; this module owns the sampling rules.

use crate::id::VariantId;
use crate::product::VariantTemplate;
use crate::rng::{Stream, Streams};
use crate::time::{MINUTES_PER_WEEK, Minutes};

/// One stochastic arrival process, one per variant.
#[derive(Debug, Clone, Copy)]
pub struct ArrivalGenerator {
    pub variant: VariantId,
}

impl ArrivalGenerator {
    /// Minutes until the next lot: a full cycle per product in the lot, where
    /// one cycle is a week divided by the sampled weekly volume. Non-positive
    /// volume draws are resampled.
    pub fn next_wait(&self, template: &VariantTemplate, streams: &mut Streams) -> Minutes {
        let (min, mode, max) = template.volume_per_week;
        let mut volume = streams.triangular(Stream::Supply, min, mode, max);
        while volume <= 0.0 {
            volume = streams.triangular(Stream::Supply, min, mode, max);
        }
        let cycle = MINUTES_PER_WEEK / volume;
        cycle * f64::from(template.lot_size)
    }
}

/// Sample a fresh product's overall condition (quality stream).
pub fn sample_condition(template: &VariantTemplate, streams: &mut Streams) -> f64 {
    let (min, mode, max) = template.condition;
    streams.triangular(Stream::Quality, min, mode, max).clamp(0.0, 1.0)
}

/// One entry of a fixed delivery schedule, resolved against the variants.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledDelivery {
    pub time: Minutes,
    pub variant: VariantId,
    /// Overrides the sampled condition when present.
    pub condition: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::ComponentSpec;
    use crate::rng::BehaviorMode;

    fn template(lot_size: u32) -> VariantTemplate {
        VariantTemplate {
            id: VariantId(0),
            name: "washer".into(),
            volume_per_week: (40.0, 50.0, 60.0),
            lot_size,
            condition: (0.4, 0.7, 0.95),
            transport_units: 1,
            components: Vec::<ComponentSpec>::new(),
        }
    }

    #[test]
    fn deterministic_wait_is_week_over_mode_volume() {
        let generator = ArrivalGenerator {
            variant: VariantId(0),
        };
        let mut streams = Streams::new(1, BehaviorMode::Deterministic);
        let wait = generator.next_wait(&template(1), &mut streams);
        assert_eq!(wait, MINUTES_PER_WEEK / 50.0);
    }

    #[test]
    fn lot_size_scales_the_wait() {
        let generator = ArrivalGenerator {
            variant: VariantId(0),
        };
        let mut streams = Streams::new(1, BehaviorMode::Deterministic);
        let single = generator.next_wait(&template(1), &mut streams);
        let lot = generator.next_wait(&template(4), &mut streams);
        assert_eq!(lot, single * 4.0);
    }

    #[test]
    fn seeded_wait_stays_within_volume_bounds() {
        let generator = ArrivalGenerator {
            variant: VariantId(0),
        };
        let mut streams = Streams::new(7, BehaviorMode::Seeded);
        for _ in 0..200 {
            let wait = generator.next_wait(&template(1), &mut streams);
            assert!(wait >= MINUTES_PER_WEEK / 60.0);
            assert!(wait <= MINUTES_PER_WEEK / 40.0);
        }
    }

    #[test]
    fn condition_sample_is_clamped_to_unit_interval() {
        let mut t = template(1);
        t.condition = (0.9, 1.0, 1.4);
        let mut streams = Streams::new(3, BehaviorMode::Seeded);
        for _ in 0..200 {
            let c = sample_condition(&t, &mut streams);
            assert!((0.0..=1.0).contains(&c));
        }
    }
}
