use crate::session::SessionRecord;

/// How far a session has been through reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Completeness {
    /// No derived field exists.
    NotStarted,
    /// All six derived fields exist and hold data.
    Complete,
    /// Anything in between. Needs an explicit skip/run decision.
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DerivedField {
    Output,
    Reconstructed,
    Velocity,
    BlinkOnset,
    BlinkOffset,
    FilterConfig,
}

impl DerivedField {
    pub const ALL: [DerivedField; 6] = [
        DerivedField::Output,
        DerivedField::Reconstructed,
        DerivedField::Velocity,
        DerivedField::BlinkOnset,
        DerivedField::BlinkOffset,
        DerivedField::FilterConfig,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Absent,
    Empty,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessReport {
    pub completeness: Completeness,
    pub fields: [(DerivedField, FieldState); 6],
}

impl CompletenessReport {
    /// Fields that are absent or empty.
    pub fn unpopulated(&self) -> Vec<DerivedField> {
        self.fields
            .iter()
            .filter(|(_, state)| *state != FieldState::Populated)
            .map(|(field, _)| *field)
            .collect()
    }
}

pub fn evaluate(session: &SessionRecord) -> CompletenessReport {
    let fields = DerivedField::ALL.map(|f| (f, session.field_state(f)));

    let absent = fields.iter().filter(|(_, s)| *s == FieldState::Absent).count();
    let populated = fields
        .iter()
        .filter(|(_, s)| *s == FieldState::Populated)
        .count();

    let completeness = if absent == fields.len() {
        Completeness::NotStarted
    } else if populated == fields.len() {
        Completeness::Complete
    } else {
        Completeness::Ambiguous
    };

    CompletenessReport {
        completeness,
        fields,
    }
}

pub fn classify(session: &SessionRecord) -> Completeness {
    evaluate(session).completeness
}
