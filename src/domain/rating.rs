//! Statistics aggregation.
//!
//! Pure functions folding per-player deltas into scoreboard and league
//! statistic rows. Counters always merge additively so any sequence of
//! partial updates yields the same totals regardless of order.

use super::{
    PlayerDelta, RatingWeights, ScoreboardRow, StatisticDelta, StatisticRow, Team,
};

/// Result of the latest round from one player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The player's team has the higher score.
    Won,
    /// The player's team does not have the higher score.
    Lost,
}

/// Computes a player's round outcome from the scores carried by an update.
///
/// Returns `None` unless both scores are present. A tied score counts as a
/// loss for both teams.
#[must_use]
pub fn round_outcome(
    team: Team,
    team_1_score: Option<i32>,
    team_2_score: Option<i32>,
) -> Option<RoundOutcome> {
    let (one, two) = (team_1_score?, team_2_score?);
    let won = match team {
        Team::One => one > two,
        Team::Two => two > one,
    };
    Some(if won {
        RoundOutcome::Won
    } else {
        RoundOutcome::Lost
    })
}

/// Rating contribution of one player delta.
///
/// `Σ counter × weight` over kills, deaths, assists, headshots, score,
/// teammates blinded and teammates killed, plus the round bonus.
#[must_use]
pub fn rating_delta(
    weights: &RatingWeights,
    delta: &PlayerDelta,
    outcome: Option<RoundOutcome>,
) -> f64 {
    let c = &delta.counters;
    let counters = f64::from(c.kills) * weights.kill
        + f64::from(c.headshots) * weights.headshot
        + f64::from(c.assists) * weights.assist
        + f64::from(c.deaths) * weights.death
        + f64::from(delta.score) * weights.score
        + f64::from(delta.team_blinds) * weights.mate_blinded
        + f64::from(delta.team_kills) * weights.mate_killed;
    let bonus = match outcome {
        Some(RoundOutcome::Won) => weights.round_won,
        Some(RoundOutcome::Lost) => weights.round_lost,
        None => 0.0,
    };
    counters + bonus
}

/// Statistic increment for one player delta.
#[must_use]
pub fn statistic_delta(
    weights: &RatingWeights,
    delta: &PlayerDelta,
    outcome: Option<RoundOutcome>,
) -> StatisticDelta {
    StatisticDelta {
        user_id: delta.user_id,
        counters: delta.counters,
        rating: rating_delta(weights, delta, outcome),
    }
}

/// One-off rating bonus applied when a match ends.
///
/// Players on `leader` get `match_won`, the others `match_lost`; a tied
/// match (`leader == None`) awards nothing.
#[must_use]
pub fn match_result_bonus(weights: &RatingWeights, team: Team, leader: Option<Team>) -> f64 {
    match leader {
        Some(winner) if winner == team => weights.match_won,
        Some(_) => weights.match_lost,
        None => 0.0,
    }
}

/// Folds a player delta into a scoreboard row.
///
/// Counters and score add up; team, alive, ping and disconnected take the
/// delta's value; the captain flag is kept.
#[must_use]
pub fn merge_scoreboard(row: &ScoreboardRow, delta: &PlayerDelta) -> ScoreboardRow {
    ScoreboardRow {
        match_id: row.match_id,
        user_id: row.user_id,
        team: delta.team,
        captain: row.captain,
        alive: delta.alive,
        ping: delta.ping,
        counters: row.counters.merged(delta.counters),
        score: row.score.saturating_add(delta.score),
        disconnected: delta.disconnected,
    }
}

/// Folds a statistic increment into a league statistic row.
#[must_use]
pub fn merge_statistic(row: &StatisticRow, delta: &StatisticDelta) -> StatisticRow {
    StatisticRow {
        user_id: row.user_id,
        league_id: row.league_id.clone(),
        counters: row.counters.merged(delta.counters),
        rating: row.rating + delta.rating,
    }
}

/// Sums two statistic increments for the same player.
#[must_use]
pub fn combine(a: &StatisticDelta, b: &StatisticDelta) -> StatisticDelta {
    StatisticDelta {
        user_id: a.user_id,
        counters: a.counters.merged(b.counters),
        rating: a.rating + b.rating,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Counters, LeagueId, MatchId, UserId};

    fn delta(user_id: UserId, kills: i32, deaths: i32, headshots: i32) -> PlayerDelta {
        PlayerDelta {
            user_id,
            team: Team::One,
            alive: true,
            ping: 40,
            counters: Counters {
                kills,
                deaths,
                headshots,
                ..Counters::default()
            },
            score: 0,
            disconnected: false,
            team_blinds: 0,
            team_kills: 0,
        }
    }

    #[test]
    fn weighted_rating_with_round_win() {
        let weights = RatingWeights {
            kill: 1.0,
            death: -1.0,
            headshot: 0.1,
            round_won: 1.5,
            ..RatingWeights::default()
        };
        let d = delta(UserId::new(), 5, 2, 1);
        let outcome = round_outcome(Team::One, Some(9), Some(4));
        assert_eq!(outcome, Some(RoundOutcome::Won));
        let rating = rating_delta(&weights, &d, outcome);
        assert!((rating - 4.6).abs() < 1e-9, "got {rating}");
    }

    #[test]
    fn round_outcome_needs_both_scores() {
        assert_eq!(round_outcome(Team::One, Some(3), None), None);
        assert_eq!(round_outcome(Team::Two, None, Some(3)), None);
    }

    #[test]
    fn tied_round_counts_as_lost() {
        assert_eq!(
            round_outcome(Team::One, Some(5), Some(5)),
            Some(RoundOutcome::Lost)
        );
        assert_eq!(
            round_outcome(Team::Two, Some(5), Some(5)),
            Some(RoundOutcome::Lost)
        );
        assert_eq!(
            round_outcome(Team::Two, Some(2), Some(5)),
            Some(RoundOutcome::Won)
        );
    }

    #[test]
    fn teammate_penalties_and_round_loss() {
        let weights = RatingWeights {
            mate_blinded: -0.5,
            mate_killed: -2.0,
            round_lost: -1.0,
            score: 0.01,
            ..RatingWeights::default()
        };
        let mut d = delta(UserId::new(), 0, 0, 0);
        d.team_blinds = 2;
        d.team_kills = 1;
        d.score = 100;
        let rating = rating_delta(&weights, &d, Some(RoundOutcome::Lost));
        assert!((rating - (-1.0 - 2.0 + 1.0 - 1.0)).abs() < 1e-9);
    }

    #[test]
    fn scoreboard_merge_commutes() {
        let user = UserId::new();
        let base = ScoreboardRow::initial(MatchId::new(), user, Team::One, true);
        let d1 = delta(user, 3, 1, 2);
        let mut d2 = delta(user, 1, 2, 0);
        d2.counters.mvps = 1;
        d2.score = 7;

        let ab = merge_scoreboard(&merge_scoreboard(&base, &d1), &d2);
        let ba = merge_scoreboard(&merge_scoreboard(&base, &d2), &d1);
        assert_eq!(ab.counters, ba.counters);
        assert_eq!(ab.score, ba.score);
        assert_eq!(ab.counters.kills, 4);
        assert_eq!(ab.counters.deaths, 3);
        assert_eq!(ab.counters.mvps, 1);
        assert!(ab.captain);
    }

    #[test]
    fn instantaneous_fields_are_last_write_wins() {
        let user = UserId::new();
        let base = ScoreboardRow::initial(MatchId::new(), user, Team::One, false);
        let mut d = delta(user, 0, 0, 0);
        d.team = Team::Two;
        d.alive = false;
        d.ping = 99;
        d.disconnected = true;
        let merged = merge_scoreboard(&base, &d);
        assert_eq!(merged.team, Team::Two);
        assert!(!merged.alive);
        assert_eq!(merged.ping, 99);
        assert!(merged.disconnected);
    }

    #[test]
    fn statistic_merge_is_associative() {
        let user = UserId::new();
        let weights = RatingWeights {
            kill: 2.0,
            ..RatingWeights::default()
        };
        let row = StatisticRow::empty(user, LeagueId::new("lg1"));
        let a = statistic_delta(&weights, &delta(user, 1, 0, 0), None);
        let b = statistic_delta(&weights, &delta(user, 2, 1, 0), None);
        let c = statistic_delta(&weights, &delta(user, 3, 0, 1), None);

        let left = merge_statistic(&merge_statistic(&merge_statistic(&row, &a), &b), &c);
        let right = merge_statistic(&row, &combine(&a, &combine(&b, &c)));
        assert_eq!(left.counters, right.counters);
        assert!((left.rating - right.rating).abs() < 1e-9);
        assert!((left.rating - 12.0).abs() < 1e-9);
    }

    #[test]
    fn match_bonus_by_result() {
        let weights = RatingWeights {
            match_won: 10.0,
            match_lost: -5.0,
            ..RatingWeights::default()
        };
        assert!((match_result_bonus(&weights, Team::One, Some(Team::One)) - 10.0).abs() < 1e-9);
        assert!((match_result_bonus(&weights, Team::Two, Some(Team::One)) + 5.0).abs() < 1e-9);
        assert!(match_result_bonus(&weights, Team::Two, None).abs() < 1e-9);
    }
}
