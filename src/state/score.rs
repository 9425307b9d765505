use crate::types::RoomPlayer;

/// Standings order: score descending, then nickname
pub fn sort_players(members: &[RoomPlayer]) -> Vec<&RoomPlayer> {
    let mut sorted: Vec<&RoomPlayer> = members.iter().collect();
    sorted.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.nickname.to_lowercase().cmp(&b.nickname.to_lowercase()))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
    sorted
}

/// The leading member, if their score has reached the target.
/// Ties go to the first in standings order.
pub fn winner(members: &[RoomPlayer], target_score: u32) -> Option<&RoomPlayer> {
    sort_players(members)
        .into_iter()
        .next()
        .filter(|leader| leader.score >= target_score)
}
