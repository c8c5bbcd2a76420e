use uuid::Uuid;

use tandem_types::{Activity, Couple, Emotion, Identity, InviteCode, StatusRecord};

/// The caller's own status as last set on this device. Updated before the
/// remote write completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalStatus {
    pub activity: Activity,
    pub emotion: Emotion,
    pub message: String,
}

/// Everything local observers render for one signed-in session. Owned by
/// [`crate::Session`]; empty when signed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    pub user: Option<Identity>,
    pub partner: Option<Identity>,
    pub couple: Option<Couple>,
    pub my_status: LocalStatus,
    pub partner_status: Option<StatusRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    Unpaired,
    PendingInvite(InviteCode),
    Paired { couple_id: String, partner_id: Uuid },
}

impl AppState {
    pub fn pairing_state(&self) -> PairingState {
        let (Some(user), Some(couple)) = (&self.user, &self.couple) else {
            return PairingState::Unpaired;
        };
        if couple.is_pending() {
            return PairingState::PendingInvite(couple.invite_code.clone());
        }
        match couple.partner_of(user.id) {
            Some(partner_id) => PairingState::Paired {
                couple_id: couple.id.clone(),
                partner_id,
            },
            None => PairingState::Unpaired,
        }
    }

    pub fn partner_id(&self) -> Option<Uuid> {
        match self.pairing_state() {
            PairingState::Paired { partner_id, .. } => Some(partner_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_types::CharacterVariant;

    fn identity() -> Identity {
        Identity {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            name: "A".into(),
            character: CharacterVariant::Male,
            couple_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pairing_state_follows_couple() {
        let user = identity();
        let mut state = AppState {
            user: Some(user.clone()),
            ..Default::default()
        };
        assert_eq!(state.pairing_state(), PairingState::Unpaired);

        let code = InviteCode::parse("K7M3QX").unwrap();
        let mut couple = Couple {
            id: "c1".into(),
            first_member: user.id,
            second_member: None,
            invite_code: code.clone(),
            created_at: Utc::now(),
            connected_at: None,
        };
        state.couple = Some(couple.clone());
        assert_eq!(state.pairing_state(), PairingState::PendingInvite(code));
        assert_eq!(state.partner_id(), None);

        let partner = Uuid::new_v4();
        couple.second_member = Some(partner);
        state.couple = Some(couple);
        assert_eq!(state.partner_id(), Some(partner));
    }

    #[test]
    fn signed_out_is_unpaired() {
        assert_eq!(AppState::default().pairing_state(), PairingState::Unpaired);
    }
}
