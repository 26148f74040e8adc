/// Short customer code derived from a company name.
///
/// One word gives its first four characters; several words give their
/// initials, at most four.
pub fn generate_customer_code(company_name: &str) -> String {
    let cleaned: String = company_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    let words: Vec<&str> = cleaned.split_whitespace().collect();

    match words.as_slice() {
        [] => String::new(),
        [single] => single.chars().take(4).collect(),
        many => many.iter().filter_map(|w| w.chars().next()).take(4).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_uses_prefix() {
        assert_eq!(generate_customer_code("EarthMover"), "EART");
        assert_eq!(generate_customer_code("Acme"), "ACME");
        assert_eq!(generate_customer_code("AB"), "AB");
    }

    #[test]
    fn several_words_use_initials() {
        assert_eq!(generate_customer_code("GreenTech Solutions"), "GS");
        assert_eq!(generate_customer_code("Power Tools Pro Inc"), "PTPI");
        assert_eq!(generate_customer_code("a b c d e f"), "ABCD");
    }

    #[test]
    fn punctuation_and_spacing_are_ignored() {
        assert_eq!(generate_customer_code("  PowerTools   Pro, LLC. "), "PPL");
        assert_eq!(generate_customer_code("!!!"), "");
    }
}
