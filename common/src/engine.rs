use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    iter::Peekable,
};

/// Par intermedio (clave, valor). Los valores son JSON para poder
/// representar números, texto o estructuras.
pub type Pair = (String, Value);

/// Registro de entrada: (offset en bytes dentro del archivo, línea).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub offset: u64,
    pub line: String,
}

/// Callback explícito que reciben las funciones map/reduce del usuario.
/// Devuelve error si la tarea fue cancelada y ya no debe escribir nada.
pub trait Emitter {
    fn emit(&mut self, key: String, value: Value) -> anyhow::Result<()>;
}

/// map(clave, valor, emit)
pub type MapFn = dyn Fn(&str, &str, &mut dyn Emitter) -> anyhow::Result<()> + Send + Sync;

/// reduce(clave, valores, emit)
pub type ReduceFn = dyn Fn(&str, &[Value], &mut dyn Emitter) -> anyhow::Result<()> + Send + Sync;

impl Emitter for Vec<Pair> {
    fn emit(&mut self, key: String, value: Value) -> anyhow::Result<()> {
        self.push((key, value));
        Ok(())
    }
}

/// Formato de una línea en los archivos intermedios (JSONL).
#[derive(Serialize, Deserialize)]
struct PairLine {
    k: String,
    v: Value,
}

/* =========================
   Registros de entrada y splits
   ========================= */

/// Parte un contenido de texto en registros (offset, línea).
/// El separador '\n' (y un '\r' previo) no forma parte de la línea.
pub fn text_records(data: &[u8]) -> Vec<InputRecord> {
    let mut out = Vec::new();
    let mut offset = 0u64;

    for raw in data.split_inclusive(|b| *b == b'\n') {
        let mut line = raw;
        if line.last() == Some(&b'\n') {
            line = &line[..line.len() - 1];
        }
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        out.push(InputRecord {
            offset,
            line: String::from_utf8_lossy(line).into_owned(),
        });
        offset += raw.len() as u64;
    }

    out
}

/// Divide `items` en `n` trozos contiguos, respetando el orden.
/// Los tamaños difieren como mucho en uno (los primeros llevan el resto).
pub fn contiguous_splits<T>(items: Vec<T>, n: u32) -> Vec<Vec<T>> {
    let n = n.max(1) as usize;
    let floor = items.len() / n;
    let remainder = items.len() % n;

    let mut out = Vec::with_capacity(n);
    let mut iter = items.into_iter();
    for i in 0..n {
        let size = if i < remainder { floor + 1 } else { floor };
        out.push(iter.by_ref().take(size).collect());
    }
    out
}

/* =========================
   Shuffle: partición + orden
   ========================= */

pub fn hash_key_to_partition(key: &str, num_partitions: u32) -> u32 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() % num_partitions.max(1) as u64) as u32
}

/// Reparte los pares en `num_partitions` cubetas según hash(clave) % n.
pub fn partition_pairs(pairs: Vec<Pair>, num_partitions: u32) -> Vec<Vec<Pair>> {
    let mut parts: Vec<Vec<Pair>> = (0..num_partitions.max(1)).map(|_| Vec::new()).collect();
    for pair in pairs {
        let pid = hash_key_to_partition(&pair.0, num_partitions) as usize;
        parts[pid].push(pair);
    }
    parts
}

/// Orden estable por clave: valores de la misma clave conservan su orden de llegada.
pub fn sort_by_key(pairs: &mut [Pair]) {
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
}

/// Agrupa pares ya ordenados: cada clave aparece una vez con todos sus valores.
pub fn group_sorted(pairs: Vec<Pair>) -> GroupSorted<std::vec::IntoIter<Pair>> {
    GroupSorted {
        inner: pairs.into_iter().peekable(),
    }
}

pub struct GroupSorted<I: Iterator<Item = Pair>> {
    inner: Peekable<I>,
}

impl<I: Iterator<Item = Pair>> Iterator for GroupSorted<I> {
    type Item = (String, Vec<Value>);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, first) = self.inner.next()?;
        let mut values = vec![first];
        while let Some((k, _)) = self.inner.peek() {
            if *k != key {
                break;
            }
            if let Some((_, v)) = self.inner.next() {
                values.push(v);
            }
        }
        Some((key, values))
    }
}

/* =========================
   Archivos intermedios y de salida
   ========================= */

/// Serializa pares como JSONL: {"k": ..., "v": ...} por línea.
pub fn encode_pairs_jsonl(pairs: &[Pair]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    for (k, v) in pairs {
        let line = PairLine {
            k: k.clone(),
            v: v.clone(),
        };
        serde_json::to_writer(&mut out, &line)?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn decode_pairs_jsonl(data: &[u8]) -> serde_json::Result<Vec<Pair>> {
    let mut out = Vec::new();
    for line in data.split(|b| *b == b'\n') {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        let PairLine { k, v } = serde_json::from_slice(line)?;
        out.push((k, v));
    }
    Ok(out)
}

/// Formato final de salida: "clave\tvalor" por línea.
/// Los strings se escriben sin comillas, el resto como JSON.
pub fn format_text_output(pairs: &[Pair]) -> String {
    let mut out = String::new();
    for (k, v) in pairs {
        out.push_str(k);
        out.push('\t');
        match v {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        out.push('\n');
    }
    out
}

/// Inverso de `format_text_output` (valores numéricos vuelven a ser números).
pub fn parse_text_output(text: &str) -> Vec<Pair> {
    text.lines()
        .filter_map(|line| {
            let (k, v) = line.split_once('\t')?;
            let value = serde_json::from_str::<Value>(v).unwrap_or_else(|_| Value::String(v.to_string()));
            Some((k.to_string(), value))
        })
        .collect()
}
