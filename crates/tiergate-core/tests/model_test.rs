//! Property tests for tier suitability and error classification.

use proptest::prelude::*;
use tiergate_core::{
    ErrorClass, EventId, GatewayError, OperationKind, TierDescriptor, TierName,
};

fn kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop_oneof![Just(OperationKind::SingleRecord), Just(OperationKind::Bulk)]
}

proptest! {
    #[test]
    fn suitability_matches_kind_and_capacity(
        max_records in 1u64..10_000,
        count in 0u64..20_000,
        kind in kind_strategy(),
        supports_bulk in any::<bool>(),
    ) {
        let mut supported_kinds = vec![OperationKind::SingleRecord];
        if supports_bulk {
            supported_kinds.push(OperationKind::Bulk);
        }
        let tier = TierDescriptor {
            name: TierName::from("tier"),
            priority: 1,
            max_records_per_call: max_records,
            supported_kinds: supported_kinds.clone(),
        };

        let expected = supported_kinds.contains(&kind) && count <= max_records;
        prop_assert_eq!(tier.suitable_for(kind, count), expected);
    }

    #[test]
    fn input_and_signature_errors_never_retryable(
        reason in "[a-z ]{0,40}",
        id in "[a-z0-9_]{1,20}",
    ) {
        let errors = [
            GatewayError::InvalidSignature,
            GatewayError::malformed(reason.clone()),
            GatewayError::DuplicateEvent { event_id: EventId::from(id.as_str()) },
            GatewayError::InvalidOperation { tier: TierName::from("rest"), reason },
        ];

        for error in errors {
            prop_assert!(!error.is_retryable());
            prop_assert!(matches!(
                error.class(),
                ErrorClass::Input | ErrorClass::Signature | ErrorClass::Duplicate
            ));
        }
    }
}
