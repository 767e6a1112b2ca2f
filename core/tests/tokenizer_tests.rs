use search_core::tokenizer::tokenize;

#[test]
fn it_normalizes_case_and_width() {
    let words = tokenize("Running RUNNERS ｆｕｌｌ Café");
    assert!(words.contains(&"running".to_string()));
    assert!(words.contains(&"runners".to_string()));
    // NFKC folds full-width letters
    assert!(words.contains(&"full".to_string()));
    assert!(words.contains(&"café".to_string()));
}

#[test]
fn it_drops_pure_punctuation() {
    let words = tokenize("-- ... !!! rust, (systems) ?");
    assert_eq!(words, vec!["rust", "systems"]);
}

#[test]
fn it_keeps_stopwords_and_numbers() {
    let words = tokenize("The 2 of us");
    assert_eq!(words, vec!["the", "2", "of", "us"]);
}

#[test]
fn empty_input_yields_no_terms() {
    assert!(tokenize("").is_empty());
    assert!(tokenize("   \n\t").is_empty());
}
