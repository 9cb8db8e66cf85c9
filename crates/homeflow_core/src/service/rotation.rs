//! Round-robin member selection.
//!
//! # Invariants
//! - Candidates are ordered by member id ascending, independent of input
//!   order.
//! - Without a prior assignment the pick is uniformly random.
//! - A prior member no longer among the candidates restarts the rotation at
//!   the first candidate.

use crate::model::assignment::Assignment;
use crate::model::member::Member;
use rand::Rng;

/// Picks the member for the next occurrence after `last`.
///
/// Returns `None` when `eligible` is empty.
pub fn select_member<'a, R: Rng + ?Sized>(
    eligible: &'a [Member],
    last: Option<&Assignment>,
    rng: &mut R,
) -> Option<&'a Member> {
    if eligible.is_empty() {
        return None;
    }

    let mut ordered: Vec<&Member> = eligible.iter().collect();
    ordered.sort_by_key(|member| member.id);

    let Some(last) = last else {
        return Some(ordered[rng.gen_range(0..ordered.len())]);
    };

    let next = match ordered.iter().position(|member| member.id == last.member_id) {
        Some(index) => (index + 1) % ordered.len(),
        None => 0,
    };
    Some(ordered[next])
}

#[cfg(test)]
mod tests {
    use super::select_member;
    use crate::model::assignment::Assignment;
    use crate::model::member::Member;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn member(id: u128, family: Uuid) -> Member {
        Member::with_id(Uuid::from_u128(id), family, format!("m{id}"))
    }

    fn prior(member_id: Uuid, family: Uuid) -> Assignment {
        Assignment::pending(
            family,
            Uuid::new_v4(),
            member_id,
            NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
        )
    }

    #[test]
    fn empty_pool_selects_nobody() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_member(&[], None, &mut rng).is_none());
    }

    #[test]
    fn rotation_follows_id_order_regardless_of_input_order() {
        let family = Uuid::new_v4();
        let pool = vec![member(3, family), member(1, family), member(2, family)];
        let mut rng = StdRng::seed_from_u64(7);

        let last = prior(Uuid::from_u128(2), family);
        let picked = select_member(&pool, Some(&last), &mut rng).expect("pick");
        assert_eq!(picked.id, Uuid::from_u128(3));

        let last = prior(Uuid::from_u128(3), family);
        let picked = select_member(&pool, Some(&last), &mut rng).expect("pick");
        assert_eq!(picked.id, Uuid::from_u128(1));
    }

    #[test]
    fn unknown_prior_member_restarts_at_first() {
        let family = Uuid::new_v4();
        let pool = vec![member(5, family), member(9, family)];
        let mut rng = StdRng::seed_from_u64(7);

        let last = prior(Uuid::from_u128(42), family);
        let picked = select_member(&pool, Some(&last), &mut rng).expect("pick");
        assert_eq!(picked.id, Uuid::from_u128(5));
    }

    #[test]
    fn first_pick_is_a_pool_member() {
        let family = Uuid::new_v4();
        let pool = vec![member(1, family), member(2, family)];
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..20 {
            let picked = select_member(&pool, None, &mut rng).expect("pick");
            assert!(pool.iter().any(|candidate| candidate.id == picked.id));
        }
    }
}
