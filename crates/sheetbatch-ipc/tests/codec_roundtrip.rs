use proptest::prelude::*;
use sheetbatch_common::{ErrorKind, TaggedValue};
use sheetbatch_ipc::{Envelope, MessageType, decode, encode};

fn message_type() -> impl Strategy<Value = MessageType> {
    (1u8..=6).prop_map(|code| MessageType::try_from(code).unwrap())
}

fn scalar() -> impl Strategy<Value = TaggedValue> {
    prop_oneof![
        any::<f32>()
            .prop_filter("finite", |f| f.is_finite())
            .prop_map(|f| TaggedValue::number(f64::from(f))),
        "[a-zA-Z0-9 ]{0,12}".prop_map(TaggedValue::text),
        proptest::sample::select(ErrorKind::ALL.to_vec()).prop_map(TaggedValue::error),
        Just(TaggedValue::empty()),
    ]
}

fn array() -> impl Strategy<Value = TaggedValue> {
    (1u32..4, 1u32..4, any::<bool>()).prop_flat_map(|(rows, cols, numeric)| {
        let n = (rows * cols) as usize;
        if numeric {
            proptest::collection::vec(-1.0e6f32..1.0e6, n)
                .prop_map(move |v| {
                    TaggedValue::float_array(rows, cols, v.into_iter().map(f64::from).collect())
                        .unwrap()
                })
                .boxed()
        } else {
            proptest::collection::vec("[a-z]{0,5}", n)
                .prop_map(move |v| TaggedValue::text_array(rows, cols, v).unwrap())
                .boxed()
        }
    })
}

fn value() -> impl Strategy<Value = TaggedValue> {
    prop_oneof![3 => scalar(), 1 => array()]
}

prop_compose! {
    fn envelope()(
        message_type in message_type(),
        message_value in proptest::option::of("[A-Z.\\-|]{1,20}"),
        instances in 0i32..1000,
        num_parameters in 0i32..8,
        parameters in proptest::option::of(
            proptest::collection::vec(proptest::collection::vec(value(), 0..4), 1..4)
        ),
        results in proptest::option::of(proptest::collection::vec(value(), 1..6)),
    ) -> Envelope {
        Envelope { message_type, message_value, instances, num_parameters, parameters, results }
    }
}

proptest! {
    #[test]
    fn envelopes_survive_the_wire(env in envelope()) {
        let bytes = encode(&env).unwrap();
        let back = decode(&bytes).unwrap();
        prop_assert_eq!(back, env);
    }

    #[test]
    fn truncation_never_panics(env in envelope(), cut in 0usize..64) {
        let bytes = encode(&env).unwrap();
        let end = bytes.len().saturating_sub(cut + 1);
        prop_assert!(decode(&bytes[..end]).is_err());
    }
}
