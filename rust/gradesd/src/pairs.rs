//! Flat string form of an ordered `key -> value` list, used for the
//! per-pupil `GRADE_MAP` column.
//!
//! Layout: `key=value;key=value`. A backslash escapes `\`, `=` and `;`
//! inside keys and values, so any string pair survives a round trip.

const PAIR_SEP: char = ';';
const KV_SEP: char = '=';
const ESCAPE: char = '\\';

pub fn encode<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (i, (k, v)) in pairs.into_iter().enumerate() {
        if i > 0 {
            out.push(PAIR_SEP);
        }
        push_escaped(&mut out, k);
        out.push(KV_SEP);
        push_escaped(&mut out, v);
    }
    out
}

pub fn decode(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if text.is_empty() {
        return pairs;
    }

    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        let target = if in_value { &mut value } else { &mut key };
        match c {
            ESCAPE => {
                if let Some(next) = chars.next() {
                    target.push(next);
                }
            }
            KV_SEP if !in_value => in_value = true,
            PAIR_SEP => {
                pairs.push((std::mem::take(&mut key), std::mem::take(&mut value)));
                in_value = false;
            }
            _ => target.push(c),
        }
    }
    pairs.push((key, value));
    pairs
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        if c == ESCAPE || c == KV_SEP || c == PAIR_SEP {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}
