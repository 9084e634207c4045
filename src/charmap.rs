//! Repair of byte-level BPE mis-decodings in reconstructed word forms
//!
//! GPT-2 style vocabularies store every byte as a printable code point, so a
//! UTF-8 umlaut comes back from `id_to_token` as two or three unrelated
//! characters (`ß` becomes `ÃŁ`). The table below covers the German letters
//! and punctuation that occur in the stimuli. It is applied per model family
//! and never validated against the output; sequences outside the table pass
//! through unchanged.

/// Mis-decoded sequence and the character it stands for
pub const REPLACEMENTS: &[(&str, &str)] = &[
    ("\u{C3}\u{126}", "Ä"),
    ("\u{C3}\u{A4}", "ä"),
    ("\u{C3}\u{138}", "Ö"),
    ("\u{C3}\u{B6}", "ö"),
    ("\u{C3}\u{13E}", "Ü"),
    ("\u{C3}\u{BC}", "ü"),
    ("\u{C3}\u{141}", "ß"),
    ("\u{E2}\u{122}\u{13E}", "\u{201C}"),
    ("\u{E2}\u{122}\u{140}", "\u{201E}"),
    ("\u{C3}\u{142}", "à"),
    ("\u{C3}\u{122}", "À"),
    ("\u{C3}\u{A1}", "á"),
    ("\u{C3}\u{123}", "Á"),
    ("\u{C3}\u{A8}", "è"),
    ("\u{C3}\u{12A}", "È"),
    ("\u{C3}\u{A9}", "é"),
    ("\u{C3}\u{12B}", "É"),
    ("\u{C3}\u{BB}", "û"),
    ("\u{C3}\u{13D}", "Û"),
    ("\u{C3}\u{143}", "í"),
    ("\u{E2}\u{122}\u{135}", "\u{2013}"),
    ("\u{E2}\u{122}\u{13B}", "\u{2019}"),
];

/// Replace every known mis-decoded sequence in `word`
pub fn repair_word(word: &str) -> String {
    // Every mis-decoded sequence starts with Ã or â
    if !word.contains(['\u{C3}', '\u{E2}']) {
        return word.to_string();
    }
    REPLACEMENTS
        .iter()
        .fold(word.to_string(), |acc, (from, to)| acc.replace(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repairs_umlauts_and_eszett() {
        assert_eq!(repair_word("a\u{C3}\u{141}"), "aß");
        assert_eq!(repair_word("Holzf\u{C3}\u{A4}ller"), "Holzfäller");
        assert_eq!(repair_word("sch\u{C3}\u{A4}rfte"), "schärfte");
        assert_eq!(repair_word("\u{C3}\u{126}pfel"), "Äpfel");
    }

    #[test]
    fn test_repairs_quotes_and_dashes() {
        assert_eq!(
            repair_word("\u{E2}\u{122}\u{140}Hallo\u{E2}\u{122}\u{13E}"),
            "\u{201E}Hallo\u{201C}"
        );
        assert_eq!(repair_word("\u{E2}\u{122}\u{135}"), "–");
    }

    #[test]
    fn test_plain_words_untouched() {
        assert_eq!(repair_word("Apfel"), "Apfel");
        assert_eq!(repair_word("schärfte"), "schärfte");
        assert_eq!(repair_word(""), "");
    }

    #[test]
    fn test_no_replacement_reintroduces_a_key() {
        for (_, to) in REPLACEMENTS {
            for (from, _) in REPLACEMENTS {
                assert!(!to.contains(from), "{to:?} contains key {from:?}");
            }
        }
    }

    #[test]
    fn test_repair_is_idempotent() {
        let every_key: String = REPLACEMENTS.iter().map(|(from, _)| *from).collect();
        let samples = [
            every_key.as_str(),
            "Stra\u{C3}\u{141}e",
            "\u{C3}\u{C3}\u{141}",
            "M\u{C3}\u{BC}ller\u{E2}\u{122}\u{13B}s",
            "unchanged",
        ];
        for sample in samples {
            let once = repair_word(sample);
            assert_eq!(repair_word(&once), once, "not idempotent for {sample:?}");
        }
    }
}
