//! End-to-end parser behaviour over generated formulas.
use proptest::prelude::*;
use sheetbatch_parse::{TokenKind, parse, signature};

fn operand() -> impl Strategy<Value = String> {
    prop_oneof![
        (1u32..500, 0usize..26).prop_map(|(row, col)| format!("{}{}", (b'A' + col as u8) as char, row)),
        (0u32..1000).prop_map(|n| n.to_string()),
    ]
}

fn operator() -> impl Strategy<Value = char> {
    prop_oneof![Just('+'), Just('-'), Just('*'), Just('/'), Just('^')]
}

fn chain() -> impl Strategy<Value = (Vec<String>, Vec<char>)> {
    (1usize..8).prop_flat_map(|n| {
        (
            prop::collection::vec(operand(), n + 1),
            prop::collection::vec(operator(), n),
        )
    })
}

fn render(operands: &[String], operators: &[char]) -> String {
    let mut text = String::from("=");
    text.push_str(&operands[0]);
    for (op, rhs) in operators.iter().zip(&operands[1..]) {
        text.push(*op);
        text.push_str(rhs);
    }
    text
}

proptest! {
    #[test]
    fn binary_chains_emit_every_operand_and_operator((operands, operators) in chain()) {
        let tokens = parse(&render(&operands, &operators)).unwrap();
        prop_assert_eq!(tokens.len(), operands.len() + operators.len());
        let values = tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Constant(_) | TokenKind::CellRef(_)))
            .count();
        prop_assert_eq!(values, operands.len());
    }

    #[test]
    fn signature_ignores_cell_addresses((operands, operators) in chain(), shift in 1u32..50) {
        let cells: Vec<String> = operands.iter().enumerate().map(|(i, _)| format!("B{}", i + 1)).collect();
        let moved: Vec<String> = operands.iter().enumerate().map(|(i, _)| format!("C{}", i as u32 + shift)).collect();
        let a = parse(&render(&cells, &operators)).unwrap();
        let b = parse(&render(&moved, &operators)).unwrap();
        prop_assert_eq!(signature(&a), signature(&b));
    }
}

#[test]
fn nested_functions_with_ranges() {
    let tokens = parse("=SUMPRODUCT(A1:A3, TRANSPOSE(B1:D1)) / 2").unwrap();
    let rendered: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            "A1", "A3", ":", "B1", "D1", ":", "TRANSPOSE/1", "SUMPRODUCT/2", "2", "/"
        ]
    );
    assert_eq!(
        signature(&tokens),
        "A1|A3|:|B1|D1|:|TRANSPOSE/1|SUMPRODUCT/2|*-c|/|"
    );
}

#[test]
fn comparison_has_lowest_precedence() {
    let rendered: Vec<String> = parse("=A1+1>B1*2")
        .unwrap()
        .iter()
        .map(|t| t.to_string())
        .collect();
    assert_eq!(rendered, vec!["A1", "1", "+", "B1", "2", "*", ">"]);
}

#[test]
fn parse_errors_never_panic_on_garbage() {
    for junk in ["=((", "=)", "=,", "=SUM(,,)", "=A1:", "=!A1", "='x", "=1e", "=%"] {
        assert!(parse(junk).is_err(), "{junk} should fail");
    }
}
