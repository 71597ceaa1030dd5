pub mod errors;
pub mod ids;
pub mod model;
pub mod roles;
pub mod tokens;

pub use errors::*;
pub use ids::*;
pub use model::*;
pub use roles::*;
pub use tokens::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_tier_routes_by_complexity() {
        assert_eq!(ModelTier::for_complexity(1), ModelTier::Cheap);
        assert_eq!(ModelTier::for_complexity(3), ModelTier::Cheap);
        assert_eq!(ModelTier::for_complexity(4), ModelTier::Standard);
        assert_eq!(ModelTier::for_complexity(6), ModelTier::Standard);
        assert_eq!(ModelTier::for_complexity(7), ModelTier::Capable);
        assert_eq!(ModelTier::for_complexity(10), ModelTier::Capable);
    }

    #[test]
    fn model_tier_upgrades_saturate_at_capable() {
        assert_eq!(ModelTier::Cheap.upgraded(), ModelTier::Standard);
        assert_eq!(ModelTier::Standard.upgraded(), ModelTier::Capable);
        assert_eq!(ModelTier::Capable.upgraded(), ModelTier::Capable);
    }

    #[test]
    fn phase_sequence_advances_in_order() {
        assert_eq!(Phase::Idle.next(), Some(Phase::Requirements));
        assert_eq!(Phase::Requirements.next(), Some(Phase::Design));
        assert_eq!(Phase::Completed.next(), None);
    }

    #[test]
    fn ids_round_trip_through_json() {
        let id = TaskId::from("task_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"task_1\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn error_kind_serializes_as_envelope() {
        let err = AuroraErrorKind::CycleDetected("a -> b -> a".to_string());
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "CycleDetected");
        assert_eq!(value["message"], "a -> b -> a");
    }
}
