//! Identity, rooms and membership

use super::*;
use crate::protocol::BroadcastHint;
use crate::session::RoomRef;
use rand::Rng;

/// Outcome of resolving a join code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomLookup {
    Found(RoomRef),
    NotFound,
}

/// Cyrillic letters that look like code characters
fn fold_lookalike(c: char) -> char {
    match c {
        'А' => 'A',
        'В' => 'B',
        'Е' => 'E',
        'К' => 'K',
        'М' => 'M',
        'Н' => 'H',
        'О' => 'O',
        'Р' => 'P',
        'С' => 'S',
        'Т' => 'T',
        'Х' => 'X',
        'У' => 'Y',
        other => other,
    }
}

/// Trim, uppercase and fold look-alike characters onto the code alphabet
pub fn normalize_room_code(input: &str) -> String {
    input
        .trim()
        .to_uppercase()
        .chars()
        .map(fold_lookalike)
        .collect()
}

pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

fn room_id_of(value: &serde_json::Value) -> Option<&str> {
    ["id", "room_id", "roomId"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .filter(|id| !id.is_empty())
}

fn unwrap_lookup(value: &serde_json::Value) -> Option<&serde_json::Value> {
    match value {
        serde_json::Value::Array(rows) => rows.first().and_then(unwrap_lookup),
        serde_json::Value::Object(map) => {
            if room_id_of(value).is_some() {
                return Some(value);
            }
            if let Some(inner) = map
                .get("get_room_by_code")
                .or_else(|| map.get("GET_ROOM_BY_CODE"))
            {
                return unwrap_lookup(inner);
            }
            map.values()
                .find(|v| v.is_object() && room_id_of(v).is_some())
        }
        _ => None,
    }
}

/// Turn whatever shape the lookup procedure returned into one typed result
pub fn normalize_room_lookup(value: &serde_json::Value, code: &str) -> RoomLookup {
    let Some(row) = unwrap_lookup(value) else {
        return RoomLookup::NotFound;
    };
    let Some(id) = room_id_of(row) else {
        return RoomLookup::NotFound;
    };
    let code = row
        .get("code")
        .and_then(|v| v.as_str())
        .map_or_else(|| code.to_string(), str::to_string);

    RoomLookup::Found(RoomRef {
        id: id.to_string(),
        code,
    })
}

impl GameClient {
    pub fn set_nickname(&mut self, nickname: &str) -> ClientResult<()> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(ClientError::MissingNickname);
        }
        self.session.nickname = nickname.to_string();
        self.prefs
            .update(|p| p.nickname = Some(nickname.to_string()));
        self.navigate(Step::Connect);
        Ok(())
    }

    /// Sign in once per launch, resuming the stored session while the backend
    /// still accepts it
    pub async fn ensure_identity(&mut self) -> ClientResult<PlayerId> {
        if let Some(identity) = &self.session.identity {
            return Ok(identity.clone());
        }

        let restored = match self.prefs.prefs.session.clone() {
            Some(stored) => match self.backend.restore_session(&stored).await {
                Ok(session) => Some(session),
                Err(BackendError::Unauthorized) => {
                    tracing::warn!("Stored session for {} expired, signing in again", stored.user_id);
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };
        let auth = match restored {
            Some(session) => session,
            None => self.backend.sign_in_anonymously().await?,
        };

        let identity = auth.user_id.clone();
        tracing::info!("Using identity {}", identity);
        self.session.identity = Some(identity.clone());
        self.prefs.update(|p| p.session = Some(auth));
        Ok(identity)
    }

    pub async fn create_room(&mut self, settings: Option<RoomSettings>) -> ClientResult<RoomRef> {
        let nickname = self.session.nickname.trim().to_string();
        if nickname.is_empty() {
            return Err(ClientError::MissingNickname);
        }
        let me = self.ensure_identity().await?;

        let room = self
            .backend
            .insert_room(NewRoom {
                code: generate_room_code(),
                owner_id: me.clone(),
                status: RoomStatus::Lobby,
                settings: settings.unwrap_or(self.config.default_settings).clamped(),
            })
            .await?;
        tracing::info!("Created room {} ({})", room.code, room.id);

        self.ensure_membership(&room.id, &me, &nickname, true).await?;

        let room_ref = RoomRef {
            id: room.id,
            code: room.code,
        };
        self.enter_room(room_ref.clone(), true).await?;
        Ok(room_ref)
    }

    pub async fn join_by_code(&mut self, input: &str) -> ClientResult<RoomRef> {
        let code = normalize_room_code(input);
        if code.is_empty() {
            return Err(ClientError::MissingCode);
        }
        let me = self.ensure_identity().await?;

        let room = self.resolve_room(&code).await?;
        let nickname = match self.session.nickname.trim() {
            "" => DEFAULT_NICKNAME.to_string(),
            name => name.to_string(),
        };
        self.ensure_membership(&room.id, &me, &nickname, false)
            .await?;
        tracing::info!("Joined room {} as {}", room.code, nickname);

        self.enter_room(room.clone(), false).await?;
        self.subs
            .announce(&room.id, BroadcastHint::PlayerJoined { player_id: me })
            .await;
        Ok(room)
    }

    /// Lookup procedure first, plain table read when it gives nothing usable
    async fn resolve_room(&self, code: &str) -> ClientResult<RoomRef> {
        match self.backend.lookup_room_by_code(code).await {
            Ok(value) => {
                if let RoomLookup::Found(room) = normalize_room_lookup(&value, code) {
                    return Ok(room);
                }
            }
            Err(e) => tracing::warn!("Room lookup for {} failed, trying table: {}", code, e),
        }

        match self.backend.find_room_by_code(code).await? {
            Some(room) => Ok(RoomRef {
                id: room.id,
                code: room.code,
            }),
            None => Err(ClientError::RoomNotFound(code.to_string())),
        }
    }

    /// Insert the membership row unless it already exists
    pub async fn ensure_membership(
        &self,
        room_id: &str,
        player_id: &str,
        nickname: &str,
        is_host: bool,
    ) -> ClientResult<()> {
        if self.backend.get_member(room_id, player_id).await?.is_some() {
            return Ok(());
        }

        let result = self
            .backend
            .insert_member(NewMember {
                room_id: room_id.to_string(),
                player_id: player_id.to_string(),
                nickname: nickname.to_string(),
                is_host,
            })
            .await;
        match result {
            Err(e) if is_duplicate(&e) => Ok(()),
            other => Ok(other?),
        }
    }

    /// Attach the session to a room: subscribe, load and show it
    async fn enter_room(&mut self, room: RoomRef, host_hint: bool) -> ClientResult<()> {
        if self.session.room_id() != Some(&room.id) {
            if self.session.room.is_some() {
                self.set_active_status(false).await;
            }
            self.detach_room();
        }

        self.session.room = Some(room.clone());
        self.session.host_hint = host_hint;
        self.session.auto_jump_to_round = true;
        self.prefs
            .update(|p| p.last_room_code = Some(room.code.clone()));
        // An existing membership row may still be marked away from an earlier leave
        self.set_active_status(true).await;

        if let Err(e) = self.subs.subscribe_room(&room.id).await {
            tracing::warn!("Realtime unavailable for room {}: {}", room.code, e);
        }
        self.note_activity();
        self.refresh().await?;

        let in_progress = self
            .last_snapshot()
            .is_some_and(|s| s.room.status == RoomStatus::InProgress);
        self.navigate(if in_progress { Step::Round } else { Step::Lobby });
        Ok(())
    }

    /// Best-effort presence update for this client
    pub async fn set_active_status(&mut self, active: bool) {
        let (Some(room_id), Some(me)) = (self.session.room_id().cloned(), self.session.identity.clone())
        else {
            return;
        };

        if let Err(e) = self
            .backend
            .update_presence(&room_id, &me, active, self.clock.now())
            .await
        {
            tracing::warn!("Presence update failed: {}", e);
        }
    }

    /// Drop every tie to the current room without touching the backend
    pub(crate) fn detach_room(&mut self) {
        self.subs.unsubscribe_all();
        self.session.leave();
        self.set_snapshot(None);
    }

    pub async fn leave_room(&mut self) {
        if let Some(room) = &self.session.room {
            tracing::info!("Leaving room {}", room.code);
            self.session.auto_jump_to_round = false;
            self.set_active_status(false).await;
            self.detach_room();
        }
        self.navigate(Step::Connect);
    }
}
