use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::engine::Emitter;

/// map de WordCount: cada línea tiene el formato "hello,hadoop";
/// se parte por comas y espacios y se emite (palabra, 1). Los tokens
/// vacíos (",," o espacios de más) no se emiten.
pub fn wordcount_map(_offset: &str, line: &str, emit: &mut dyn Emitter) -> Result<()> {
    for word in line.split(|c: char| c == ',' || c.is_whitespace()) {
        let word = word.trim();
        if !word.is_empty() {
            emit.emit(word.to_string(), json!(1_u64))?;
        }
    }
    Ok(())
}

/// map identidad: emite (offset, línea).
pub fn identity_map(offset: &str, line: &str, emit: &mut dyn Emitter) -> Result<()> {
    emit.emit(offset.to_string(), json!(line))
}

/// reduce de WordCount: <hadoop, [1, 2]> -> <hadoop, 3>
pub fn sum_reduce(key: &str, values: &[Value], emit: &mut dyn Emitter) -> Result<()> {
    let mut total: u64 = 0;
    for v in values {
        let n = v
            .as_u64()
            .ok_or_else(|| anyhow!("valor no numérico para clave {}: {}", key, v))?;
        total += n;
    }
    emit.emit(key.to_string(), json!(total))
}

/// reduce que cuenta cuántos valores tiene cada clave.
pub fn count_reduce(key: &str, values: &[Value], emit: &mut dyn Emitter) -> Result<()> {
    emit.emit(key.to_string(), json!(values.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Pair;

    #[test]
    fn wordcount_map_splits_on_commas_and_spaces() {
        let mut out: Vec<Pair> = Vec::new();
        wordcount_map("0", "hello,hadoop  hello,,hdfs", &mut out).unwrap();

        let words: Vec<&str> = out.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(words, vec!["hello", "hadoop", "hello", "hdfs"]);
        assert!(out.iter().all(|(_, v)| *v == json!(1)));
    }

    #[test]
    fn wordcount_map_on_empty_line_emits_nothing() {
        let mut out: Vec<Pair> = Vec::new();
        wordcount_map("0", "", &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn sum_reduce_adds_values() {
        let mut out: Vec<Pair> = Vec::new();
        sum_reduce("hadoop", &[json!(1), json!(2)], &mut out).unwrap();
        assert_eq!(out, vec![("hadoop".to_string(), json!(3))]);
    }

    #[test]
    fn sum_reduce_rejects_non_numeric() {
        let mut out: Vec<Pair> = Vec::new();
        let res = sum_reduce("x", &[json!("uno")], &mut out);
        assert!(res.is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn count_reduce_counts_values() {
        let mut out: Vec<Pair> = Vec::new();
        count_reduce("k", &[json!("a"), json!("b")], &mut out).unwrap();
        assert_eq!(out, vec![("k".to_string(), json!(2))]);
    }
}
