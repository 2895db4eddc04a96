use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use tmline::{DocumentModel, Registry, TokensChanged};

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .add_grammar_from_path("src/fixtures/grammars/mini.json")
        .unwrap();
    registry
        .add_grammar_from_path("src/fixtures/grammars/todo.json")
        .unwrap();
    registry
}

#[test]
fn document_matches_line_by_line_tokenization() {
    let registry = registry();
    let grammar = registry.grammar("source.mini").unwrap();
    let sample = fs::read_to_string("src/fixtures/samples/sample.mini").unwrap();
    let mut model = DocumentModel::new(grammar, sample.trim_end());
    assert_eq!(model.line_count(), 11);

    let mut state = None;
    for (i, line) in sample.lines().enumerate() {
        let result = grammar.tokenize_line(line, state.as_ref()).unwrap();
        assert_eq!(model.line_tokens(i).unwrap(), &result.tokens[..]);
        assert_eq!(model.line_state(i).unwrap(), &result.rule_stack);
        state = Some(result.rule_stack);
    }
}

#[test]
fn closing_a_comment_notifies_the_following_lines() {
    let registry = registry();
    let grammar = registry.grammar("source.mini").unwrap();
    let mut model = DocumentModel::new(grammar, "/* a\nb\nc */\nlet d");
    model.tokenize_all().unwrap();

    let events: Rc<RefCell<Vec<TokensChanged>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    model.add_listener(move |e| sink.borrow_mut().push(e.clone()));

    model.set_line(0, "/* a */").unwrap();
    model.tokenize_all().unwrap();
    // `c */` still ends outside of a comment so `let d` is left alone
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(events.borrow()[0].ranges, vec![0..3]);
    assert_eq!(
        model.line_tokens(1).unwrap()[0].scopes.last().unwrap().as_str(),
        "source.mini"
    );

    // nothing changed, nothing to notify
    model.tokenize_all().unwrap();
    assert_eq!(events.borrow().len(), 1);
}
