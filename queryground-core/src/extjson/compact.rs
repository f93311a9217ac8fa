// queryground-core/src/extjson/compact.rs
// Textual compaction of extended-JSON documents and query statements
//
// Compaction never parses: it strips whitespace outside of string and
// regex literals, keeping a single space when two identifier characters
// would otherwise collide (so `new Date(1)` stays intact). This makes
// it safe to run on whole query statements and on malformed input, and
// it is idempotent by construction.

/// Produce the canonical whitespace-free form of `src`
pub fn compact(src: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        let c = src[i];
        match c {
            b'"' | b'\'' => {
                let end = copy_string(src, i, &mut out);
                i = end;
            }
            b'/' if regex_can_start_here(&out) => {
                let end = copy_regex(src, i, &mut out);
                i = end;
            }
            c if c.is_ascii_whitespace() => {
                let mut j = i;
                while j < src.len() && src[j].is_ascii_whitespace() {
                    j += 1;
                }
                // keep one separator between adjacent identifier chars,
                // everything else collapses to nothing
                if j < src.len()
                    && out.last().map(|&b| is_ident_char(b)).unwrap_or(false)
                    && is_ident_char(src[j])
                {
                    out.push(b' ');
                }
                i = j;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

/// A `/` starts a regex literal only in value position
fn regex_can_start_here(out: &[u8]) -> bool {
    match out.last() {
        None => true,
        Some(&b) => matches!(b, b':' | b',' | b'[' | b'{' | b'('),
    }
}

/// Copy a quoted string verbatim, spaces included. Unterminated strings
/// swallow the rest of the input untouched.
fn copy_string(src: &[u8], start: usize, out: &mut Vec<u8>) -> usize {
    let quote = src[start];
    out.push(quote);
    let mut i = start + 1;
    while i < src.len() {
        let c = src[i];
        out.push(c);
        i += 1;
        if c == b'\\' {
            if i < src.len() {
                out.push(src[i]);
                i += 1;
            }
        } else if c == quote {
            return i;
        }
    }
    i
}

/// Copy a `/pattern/options` literal verbatim
fn copy_regex(src: &[u8], start: usize, out: &mut Vec<u8>) -> usize {
    out.push(b'/');
    let mut i = start + 1;
    while i < src.len() {
        let c = src[i];
        out.push(c);
        i += 1;
        if c == b'\\' {
            if i < src.len() {
                out.push(src[i]);
                i += 1;
            }
        } else if c == b'/' {
            // trailing option letters
            while i < src.len() && src[i].is_ascii_alphabetic() {
                out.push(src[i]);
                i += 1;
            }
            return i;
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact_str(s: &str) -> String {
        String::from_utf8(compact(s.as_bytes())).unwrap()
    }

    #[test]
    fn test_compact_simple_document() {
        assert_eq!(
            compact_str("[ {\n  \"_id\": 1,\n  \"key\": { \"field\": \"someValue\" }\n} ]"),
            r#"[{"_id":1,"key":{"field":"someValue"}}]"#
        );
    }

    #[test]
    fn test_compact_preserves_string_content() {
        assert_eq!(
            compact_str(r#"[{ "k": "value 1", "k2": "O'Neil" }]"#),
            r#"[{"k":"value 1","k2":"O'Neil"}]"#
        );
    }

    #[test]
    fn test_compact_keeps_new_date_token() {
        assert_eq!(
            compact_str("[{ \"key\": new Date( 18384919 ) }]"),
            r#"[{"key":new Date(18384919)}]"#
        );
    }

    #[test]
    fn test_compact_whole_query_statement() {
        assert_eq!(
            compact_str(
                "db.collection.find( { \"_id\": ObjectId(\"5a934e000102030405000000\") }, { \"_id\": 0 } )"
            ),
            r#"db.collection.find({"_id":ObjectId("5a934e000102030405000000")},{"_id":0})"#
        );
    }

    #[test]
    fn test_compact_regex_literal() {
        assert_eq!(
            compact_str(r#"db.col123.aggregate([{ "$match": { "k": /^db\..(\w+)\.(find|aggregate)\([\s\S]*\)$/ } }])"#),
            r#"db.col123.aggregate([{"$match":{"k":/^db\..(\w+)\.(find|aggregate)\([\s\S]*\)$/}}])"#
        );
    }

    #[test]
    fn test_compact_unterminated_string_passes_through() {
        assert_eq!(compact_str(r#"[{k: "str}]"#), r#"[{k:"str}]"#);
    }

    #[test]
    fn test_compact_unterminated_regex_passes_through() {
        assert_eq!(compact_str(r#"[{ k: /^db.*(\w)}]"#), r#"[{k:/^db.*(\w)}]"#);
    }

    #[test]
    fn test_compact_is_idempotent() {
        let inputs = [
            "[ { \"k\" : 1 , \"d\": new Date( 1 ) } , ]",
            r#"db.coll.find({k: /a b/i})"#,
            r#"[{k: "str}]"#,
            "{ nested : { deep : [ 1 , 2 ] } }",
        ];
        for input in inputs {
            let once = compact_str(input);
            let twice = compact_str(&once);
            assert_eq!(once, twice, "compact not idempotent for {:?}", input);
        }
    }
}
