//! Engagement scoring: pure functions shared by the ranking pipeline and the
//! trending aggregator.

use chrono::{DateTime, Utc};

/// Media attachments beyond this count add nothing.
pub const MAX_SCORED_MEDIA: u32 = 3;

/// Fractional hours between `created_at` and `now`, clamped at zero for
/// content stamped in the future.
pub fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - created_at).num_milliseconds() as f64 / 3_600_000.0).max(0.0)
}

/// Freshness multiplier: 1.5 within a day, 1.2 within two days, else 1.0.
pub fn recency_multiplier(age_hours: f64) -> f64 {
    if age_hours <= 24.0 {
        1.5
    } else if age_hours <= 48.0 {
        1.2
    } else {
        1.0
    }
}

/// Composite score of a content item, rounded to one decimal.
///
/// Likes weigh 3, replies 5, media 2 (at most three), plus like velocity
/// (likes per hour × 10), all scaled by the recency multiplier.
pub fn engagement_score(likes: u64, replies: u64, media_count: u32, age_hours: f64) -> f64 {
    let age_hours = if age_hours.is_finite() { age_hours.max(0.0) } else { 0.0 };
    let media = media_count.min(MAX_SCORED_MEDIA) as f64;
    let velocity = if age_hours > 0.0 {
        likes as f64 / age_hours * 10.0
    } else {
        0.0
    };
    let base = likes as f64 * 3.0 + replies as f64 * 5.0 + media * 2.0 + velocity;
    (base * recency_multiplier(age_hours) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_post_gets_full_multiplier() {
        // (10*3 + 2*5 + 1*2 + 10/2*10) * 1.5
        assert_eq!(engagement_score(10, 2, 1, 2.0), 138.0);
    }

    #[test]
    fn zero_age_has_no_velocity() {
        assert_eq!(engagement_score(4, 0, 0, 0.0), 18.0);
        assert!(engagement_score(4, 0, 0, 0.0).is_finite());
    }

    #[test]
    fn negative_age_is_treated_as_new() {
        assert_eq!(engagement_score(4, 1, 0, -3.0), engagement_score(4, 1, 0, 0.0));
    }

    #[test]
    fn media_is_capped() {
        assert_eq!(engagement_score(0, 0, 3, 100.0), engagement_score(0, 0, 9, 100.0));
        assert_eq!(engagement_score(0, 0, 3, 100.0), 6.0);
    }

    #[test]
    fn multiplier_steps_at_day_boundaries() {
        assert_eq!(recency_multiplier(24.0), 1.5);
        assert_eq!(recency_multiplier(24.1), 1.2);
        assert_eq!(recency_multiplier(48.0), 1.2);
        assert_eq!(recency_multiplier(48.1), 1.0);
    }

    #[test]
    fn monotonic_in_likes_and_replies() {
        for age in [0.0, 1.0, 30.0, 200.0] {
            let mut last = engagement_score(0, 0, 0, age);
            for likes in 1..50 {
                let next = engagement_score(likes, 0, 0, age);
                assert!(next >= last, "likes {likes} at age {age}");
                last = next;
            }
            assert!(engagement_score(5, 3, 0, age) > engagement_score(5, 2, 0, age));
        }
    }

    #[test]
    fn age_hours_clamps_future_timestamps() {
        let now = Utc::now();
        assert_eq!(age_hours(now + Duration::minutes(5), now), 0.0);
        assert_eq!(age_hours(now - Duration::minutes(90), now), 1.5);
    }
}
