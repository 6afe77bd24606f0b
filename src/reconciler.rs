use crate::presence::SessionSnapshot;

/// Which side of the pair is pressing the shared surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TouchState {
    #[default]
    Neither,
    SelfOnly,
    FriendOnly,
    Both,
}

impl TouchState {
    pub fn from_flags(me: bool, friend: bool) -> Self {
        match (me, friend) {
            (false, false) => TouchState::Neither,
            (true, false) => TouchState::SelfOnly,
            (false, true) => TouchState::FriendOnly,
            (true, true) => TouchState::Both,
        }
    }
}

/// What the shared space knows about the pair after the latest snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceView {
    pub both_present: bool,
    pub both_touching: bool,
    pub touch: TouchState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Waiting,
    Together,
    HoldingHands,
}

impl DisplayState {
    pub fn caption(&self, friend_name: &str) -> String {
        match self {
            DisplayState::HoldingHands => "You're holding hands 🌸".to_owned(),
            DisplayState::Together => "You're together now 💖".to_owned(),
            DisplayState::Waiting => format!("Waiting for {}...", friend_name),
        }
    }

    pub fn glows(&self) -> bool {
        *self == DisplayState::HoldingHands
    }
}

impl From<PresenceView> for DisplayState {
    fn from(view: PresenceView) -> Self {
        if view.both_touching {
            DisplayState::HoldingHands
        } else if view.both_present {
            DisplayState::Together
        } else {
            DisplayState::Waiting
        }
    }
}

/// Derives the joint flags of a pair from their two records.
///
/// `lastUpdated` is not consulted: the store's own write order decides which
/// value is current.
#[derive(Debug, Clone)]
pub struct Reconciler {
    me: String,
    friend: String,
}

impl Reconciler {
    pub fn new(me: &str, friend: &str) -> Self {
        Reconciler {
            me: me.to_owned(),
            friend: friend.to_owned(),
        }
    }

    pub fn reconcile(&self, snapshot: &SessionSnapshot) -> PresenceView {
        let me = snapshot.record(&self.me);
        let friend = snapshot.record(&self.friend);
        PresenceView {
            both_present: me.online && friend.online,
            both_touching: me.touching && friend.touching,
            touch: TouchState::from_flags(me.touching, friend.touching),
        }
    }
}
