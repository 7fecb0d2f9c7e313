//! # Completion Record Model
//!
//! Tracks one cleaner's completion confirmation for an appointment through
//! `not_submitted → submitted → approved | auto_approved | disputed`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "completion_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub appointment_id: Uuid,
    pub cleaner_id: Uuid,

    pub status: CompletionStatus,

    pub submitted_at: Option<DateTimeWithTimeZone>,
    pub auto_approval_expires_at: Option<DateTimeWithTimeZone>,
    pub approved_at: Option<DateTimeWithTimeZone>,

    /// Homeowner id for manual approvals; NULL for system approvals
    pub approved_by: Option<Uuid>,

    pub dispute_reason: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Who approved the record, if it has been approved.
    pub fn approver(&self) -> Option<ApprovedBy> {
        match self.status {
            CompletionStatus::Approved => self.approved_by.map(ApprovedBy::Homeowner),
            CompletionStatus::AutoApproved => Some(ApprovedBy::System),
            _ => None,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum CompletionStatus {
    #[sea_orm(string_value = "not_submitted")]
    #[serde(rename = "not_submitted")]
    #[default]
    NotSubmitted,

    #[sea_orm(string_value = "submitted")]
    #[serde(rename = "submitted")]
    Submitted,

    #[sea_orm(string_value = "approved")]
    #[serde(rename = "approved")]
    Approved,

    #[sea_orm(string_value = "auto_approved")]
    #[serde(rename = "auto_approved")]
    AutoApproved,

    #[sea_orm(string_value = "disputed")]
    #[serde(rename = "disputed")]
    Disputed,
}

impl CompletionStatus {
    /// Legal moves of the completion workflow. The repository's conditional updates
    /// enforce the same table against concurrent writers.
    pub fn can_transition_to(&self, next: CompletionStatus) -> bool {
        use CompletionStatus::*;
        matches!(
            (self, next),
            (NotSubmitted, Submitted)
                | (Submitted, Approved)
                | (Submitted, AutoApproved)
                | (Submitted, Disputed)
        )
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, CompletionStatus::Approved | CompletionStatus::AutoApproved)
    }
}

/// Who confirmed a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ApprovedBy {
    Homeowner(Uuid),
    System,
}

impl ApprovedBy {
    pub fn resulting_status(&self) -> CompletionStatus {
        match self {
            ApprovedBy::Homeowner(_) => CompletionStatus::Approved,
            ApprovedBy::System => CompletionStatus::AutoApproved,
        }
    }

    /// Value persisted in the `approved_by` column.
    pub fn approver_id(&self) -> Option<Uuid> {
        match self {
            ApprovedBy::Homeowner(id) => Some(*id),
            ApprovedBy::System => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::appointment::Entity",
        from = "Column::AppointmentId",
        to = "super::appointment::Column::Id"
    )]
    Appointment,
}

impl Related<super::appointment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Appointment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_submitted_records_can_be_finalized() {
        use CompletionStatus::*;
        assert!(NotSubmitted.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Approved));
        assert!(Submitted.can_transition_to(AutoApproved));
        assert!(Submitted.can_transition_to(Disputed));

        assert!(!NotSubmitted.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(AutoApproved));
        assert!(!AutoApproved.can_transition_to(Approved));
        assert!(!Disputed.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Disputed));
    }

    #[test]
    fn approver_reflects_status() {
        let homeowner = Uuid::new_v4();
        let now = chrono::Utc::now().fixed_offset();
        let mut record = Model {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            cleaner_id: Uuid::new_v4(),
            status: CompletionStatus::Approved,
            submitted_at: Some(now),
            auto_approval_expires_at: Some(now),
            approved_at: Some(now),
            approved_by: Some(homeowner),
            dispute_reason: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(record.approver(), Some(ApprovedBy::Homeowner(homeowner)));

        record.status = CompletionStatus::AutoApproved;
        record.approved_by = None;
        assert_eq!(record.approver(), Some(ApprovedBy::System));

        record.status = CompletionStatus::Submitted;
        assert_eq!(record.approver(), None);
    }

    #[test]
    fn approved_by_serializes_as_tagged_variant() {
        let id = Uuid::nil();
        let json = serde_json::to_value(ApprovedBy::Homeowner(id)).unwrap();
        assert_eq!(json["kind"], "homeowner");
        assert_eq!(json["id"], id.to_string());
        let json = serde_json::to_value(ApprovedBy::System).unwrap();
        assert_eq!(json["kind"], "system");
    }
}
