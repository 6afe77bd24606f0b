use failure::Fail;

#[derive(Debug, Fail, PartialEq, Eq)]
pub enum PresenceError {
    #[fail(display = "participant id must not be empty")]
    EmptyParticipant,

    #[fail(display = "participant id {:?} contains the session separator", _0)]
    InvalidParticipant(String),

    #[fail(display = "a session needs two distinct participants, got {:?} twice", _0)]
    SameParticipant(String),

    #[fail(display = "malformed session key {:?}", _0)]
    MalformedSessionKey(String),

    #[fail(display = "{} is not a participant of session {}", participant, session)]
    NotAParticipant { participant: String, session: String },

    #[fail(display = "{} may not write the record of {}", writer, participant)]
    ForeignRecord { writer: String, participant: String },

    #[fail(display = "connection is already identified as {}", _0)]
    AlreadyIdentified(String),

    #[fail(display = "connection has not identified itself")]
    NotIdentified,

    #[fail(display = "invalid color {:?}", _0)]
    InvalidColor(String),

    #[fail(display = "store unavailable: {}", _0)]
    StoreUnavailable(String),
}

pub type Result<T> = std::result::Result<T, failure::Error>;
