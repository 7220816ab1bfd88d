//! Unicode to ASCII folding used for slugs and path segments
//!
//! Folding runs in two passes. The unaccent pass strips combining marks and
//! maps accented Latin letters and ligatures onto their base letters. The
//! transliteration pass then maps Greek and Cyrillic letters and a few
//! typographic symbols. Anything still outside ASCII is dropped. Output is
//! pure ASCII, so folding is idempotent.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static pattern is valid"));

/// Fold text to ASCII, preserving case where the source script has it
pub fn transliterate(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            output.push(c);
        } else if is_combining_mark(c) {
            continue;
        } else if let Some(folded) = unaccent(c).or_else(|| fold_script(c)) {
            output.push_str(folded);
        }
    }
    output
}

/// Lowercase URL-safe form: folded text where every run of characters other
/// than ASCII letters and digits becomes a single separator
pub fn urlize(text: &str, separator: &str) -> String {
    let lower = transliterate(text).to_lowercase();
    let joined = NON_ALPHANUMERIC.replace_all(&lower, NoExpand(separator));
    trim_separator(&joined, separator).to_string()
}

/// Strip leading and trailing separators
pub fn trim_separator<'a>(text: &'a str, separator: &str) -> &'a str {
    if separator.is_empty() {
        return text;
    }
    text.trim_start_matches(separator).trim_end_matches(separator)
}

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{20D0}'..='\u{20FF}')
}

fn unaccent(c: char) -> Option<&'static str> {
    let folded = match c {
        // Latin-1 supplement
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "A",
        'Æ' => "AE",
        'Ç' => "C",
        'È' | 'É' | 'Ê' | 'Ë' => "E",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I",
        'Ð' => "D",
        'Ñ' => "N",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "O",
        'Ù' | 'Ú' | 'Û' | 'Ü' => "U",
        'Ý' => "Y",
        'Þ' => "TH",
        'ß' => "ss",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'æ' => "ae",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ð' => "d",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'þ' => "th",
        // Latin extended-A
        'Ā' | 'Ă' | 'Ą' => "A",
        'ā' | 'ă' | 'ą' => "a",
        'Ć' | 'Ĉ' | 'Ċ' | 'Č' => "C",
        'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'Ď' | 'Đ' => "D",
        'ď' | 'đ' => "d",
        'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "E",
        'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => "G",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'Ĥ' | 'Ħ' => "H",
        'ĥ' | 'ħ' => "h",
        'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => "I",
        'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'Ĳ' => "IJ",
        'ĳ' => "ij",
        'Ĵ' => "J",
        'ĵ' => "j",
        'Ķ' => "K",
        'ķ' | 'ĸ' => "k",
        'Ĺ' | 'Ļ' | 'Ľ' | 'Ŀ' | 'Ł' => "L",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'Ń' | 'Ņ' | 'Ň' | 'Ŋ' => "N",
        'ń' | 'ņ' | 'ň' | 'ŉ' | 'ŋ' => "n",
        'Ō' | 'Ŏ' | 'Ő' => "O",
        'ō' | 'ŏ' | 'ő' => "o",
        'Œ' => "OE",
        'œ' => "oe",
        'Ŕ' | 'Ŗ' | 'Ř' => "R",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => "S",
        'ś' | 'ŝ' | 'ş' | 'š' | 'ſ' => "s",
        'Ţ' | 'Ť' | 'Ŧ' => "T",
        'ţ' | 'ť' | 'ŧ' => "t",
        'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => "U",
        'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'Ŵ' => "W",
        'ŵ' => "w",
        'Ŷ' | 'Ÿ' => "Y",
        'ŷ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        // Latin extended-B
        'ƒ' => "f",
        'Ơ' => "O",
        'ơ' => "o",
        'Ư' => "U",
        'ư' => "u",
        'Ǎ' => "A",
        'ǎ' => "a",
        'Ǐ' => "I",
        'ǐ' => "i",
        'Ǒ' => "O",
        'ǒ' => "o",
        'Ǔ' | 'Ǖ' | 'Ǘ' | 'Ǚ' | 'Ǜ' => "U",
        'ǔ' | 'ǖ' | 'ǘ' | 'ǚ' | 'ǜ' => "u",
        'Ǽ' => "AE",
        'ǽ' => "ae",
        'Ǿ' => "O",
        'ǿ' => "o",
        'Ș' => "S",
        'ș' => "s",
        'Ț' => "T",
        'ț' => "t",
        // Latin ligatures
        'ﬀ' => "ff",
        'ﬁ' => "fi",
        'ﬂ' => "fl",
        'ﬃ' => "ffi",
        'ﬄ' => "ffl",
        'ﬅ' | 'ﬆ' => "st",
        _ => return vietnamese(c),
    };
    Some(folded)
}

/// Latin extended additional block used by Vietnamese: upper and lower case
/// letters alternate, upper case on even code points
fn vietnamese(c: char) -> Option<&'static str> {
    let code = c as u32;
    let (upper, lower) = match code {
        0x1EA0..=0x1EB7 => ("A", "a"),
        0x1EB8..=0x1EC7 => ("E", "e"),
        0x1EC8..=0x1ECB => ("I", "i"),
        0x1ECC..=0x1EE3 => ("O", "o"),
        0x1EE4..=0x1EF1 => ("U", "u"),
        0x1EF2..=0x1EF9 => ("Y", "y"),
        _ => return None,
    };
    Some(if code % 2 == 0 { upper } else { lower })
}

fn fold_script(c: char) -> Option<&'static str> {
    let folded = match c {
        // Greek
        'Α' | 'Ά' => "A",
        'α' | 'ά' => "a",
        'Β' => "B",
        'β' => "b",
        'Γ' => "G",
        'γ' => "g",
        'Δ' => "D",
        'δ' => "d",
        'Ε' | 'Έ' => "E",
        'ε' | 'έ' => "e",
        'Ζ' => "Z",
        'ζ' => "z",
        'Η' | 'Ή' => "I",
        'η' | 'ή' => "i",
        'Θ' => "TH",
        'θ' => "th",
        'Ι' | 'Ί' | 'Ϊ' => "I",
        'ι' | 'ί' | 'ϊ' | 'ΐ' => "i",
        'Κ' => "K",
        'κ' => "k",
        'Λ' => "L",
        'λ' => "l",
        'Μ' => "M",
        'μ' => "m",
        'Ν' => "N",
        'ν' => "n",
        'Ξ' => "KS",
        'ξ' => "ks",
        'Ο' | 'Ό' => "O",
        'ο' | 'ό' => "o",
        'Π' => "P",
        'π' => "p",
        'Ρ' => "R",
        'ρ' => "r",
        'Σ' => "S",
        'σ' | 'ς' => "s",
        'Τ' => "T",
        'τ' => "t",
        'Υ' | 'Ύ' | 'Ϋ' => "Y",
        'υ' | 'ύ' | 'ϋ' | 'ΰ' => "y",
        'Φ' => "F",
        'φ' => "f",
        'Χ' => "CH",
        'χ' => "ch",
        'Ψ' => "PS",
        'ψ' => "ps",
        'Ω' | 'Ώ' => "O",
        'ω' | 'ώ' => "o",
        // Cyrillic
        'А' => "A",
        'а' => "a",
        'Б' => "B",
        'б' => "b",
        'В' => "V",
        'в' => "v",
        'Г' | 'Ґ' => "G",
        'г' | 'ґ' => "g",
        'Д' => "D",
        'д' => "d",
        'Е' => "E",
        'е' => "e",
        'Ё' => "Yo",
        'ё' => "yo",
        'Є' => "Ye",
        'є' => "ye",
        'Ж' => "Zh",
        'ж' => "zh",
        'З' => "Z",
        'з' => "z",
        'И' | 'І' => "I",
        'и' | 'і' => "i",
        'Ї' => "Yi",
        'ї' => "yi",
        'Й' => "Y",
        'й' => "y",
        'К' => "K",
        'к' => "k",
        'Л' => "L",
        'л' => "l",
        'М' => "M",
        'м' => "m",
        'Н' => "N",
        'н' => "n",
        'О' => "O",
        'о' => "o",
        'П' => "P",
        'п' => "p",
        'Р' => "R",
        'р' => "r",
        'С' => "S",
        'с' => "s",
        'Т' => "T",
        'т' => "t",
        'У' => "U",
        'у' => "u",
        'Ф' => "F",
        'ф' => "f",
        'Х' => "H",
        'х' => "h",
        'Ц' => "Ts",
        'ц' => "ts",
        'Ч' => "Ch",
        'ч' => "ch",
        'Ш' => "Sh",
        'ш' => "sh",
        'Щ' => "Sch",
        'щ' => "sch",
        'Ъ' | 'ъ' | 'Ь' | 'ь' => "",
        'Ы' => "Y",
        'ы' => "y",
        'Э' => "E",
        'э' => "e",
        'Ю' => "Yu",
        'ю' => "yu",
        'Я' => "Ya",
        'я' => "ya",
        // Typography
        '‘' | '’' | '‚' | '′' => "'",
        '“' | '”' | '„' | '«' | '»' => "\"",
        '–' | '—' | '‐' | '−' => "-",
        '…' => "...",
        '\u{00A0}' => " ",
        '€' => "EUR",
        '£' => "GBP",
        '©' => "(c)",
        '®' => "(r)",
        '™' => "TM",
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlize_european_accents() {
        assert_eq!(urlize("Café du Monde", "-"), "cafe-du-monde");
        assert_eq!(urlize("Ærøskøbing Straße", "-"), "aeroskobing-strasse");
        assert_eq!(urlize("Łódź, Kraków & Gdańsk", "-"), "lodz-krakow-gdansk");
        assert_eq!(urlize("Şişli Çarşı", "_"), "sisli_carsi");
    }

    #[test]
    fn test_combining_marks_are_stripped() {
        // "é" written as "e" + COMBINING ACUTE ACCENT
        assert_eq!(transliterate("Cafe\u{0301}"), "Cafe");
    }

    #[test]
    fn test_other_scripts() {
        assert_eq!(urlize("Привет мир", "-"), "privet-mir");
        assert_eq!(urlize("Αθήνα", "-"), "athina");
        assert_eq!(urlize("Hà Nội", "-"), "ha-noi");
        assert_eq!(urlize("Київ", "-"), "kiyiv");
    }

    #[test]
    fn test_unknown_characters_are_dropped() {
        assert_eq!(urlize("東京 Tower", "-"), "tower");
        assert_eq!(urlize("!!!", "-"), "");
    }

    #[test]
    fn test_transliteration_is_idempotent() {
        for input in ["Café du Monde", "Ñandú — “quoted”", "Дом Ωmega", "plain ascii"] {
            let once = transliterate(input);
            assert_eq!(transliterate(&once), once);
            let slug = urlize(input, "-");
            assert_eq!(urlize(&slug, "-"), slug);
        }
    }

    #[test]
    fn test_trim_separator() {
        assert_eq!(trim_separator("--a-b--", "-"), "a-b");
        assert_eq!(trim_separator("a-b", ""), "a-b");
    }
}
