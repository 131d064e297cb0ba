//! Ejecución de una tarea map o reduce con las funciones del usuario.

use std::{
    any::Any,
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::anyhow;
use common::{
    engine::{group_sorted, partition_pairs, Emitter, InputRecord, MapFn, Pair, ReduceFn},
    wordcount, DfsError, DfsResult,
};
use serde_json::Value;
use thiserror::Error;

/// Cancelación cooperativa: la tarea deja de emitir en cuanto se activa.
pub type CancelToken = Arc<AtomicBool>;

pub fn cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("la función {function} devolvió error: {message}")]
    UserFunction { function: String, message: String },

    #[error("la función {function} hizo panic: {message}")]
    Panicked { function: String, message: String },

    #[error("tarea cancelada")]
    Cancelled,
}

/* =========================
   Registro de funciones
   ========================= */

/// Funciones map/reduce disponibles, por id.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    mappers: HashMap<String, Arc<MapFn>>,
    reducers: HashMap<String, Arc<ReduceFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registro con WordCount y compañía ya cargados.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register_mapper("wordcount", wordcount::wordcount_map);
        reg.register_mapper("identity", wordcount::identity_map);
        reg.register_reducer("sum", wordcount::sum_reduce);
        reg.register_reducer("count", wordcount::count_reduce);
        reg
    }

    pub fn register_mapper<F>(&mut self, id: &str, f: F)
    where
        F: Fn(&str, &str, &mut dyn Emitter) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.mappers.insert(id.to_string(), Arc::new(f));
    }

    pub fn register_reducer<F>(&mut self, id: &str, f: F)
    where
        F: Fn(&str, &[Value], &mut dyn Emitter) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.reducers.insert(id.to_string(), Arc::new(f));
    }

    pub fn mapper(&self, id: &str) -> DfsResult<Arc<MapFn>> {
        self.mappers
            .get(id)
            .cloned()
            .ok_or_else(|| DfsError::UnknownFunction(format!("mapper {}", id)))
    }

    pub fn reducer(&self, id: &str) -> DfsResult<Arc<ReduceFn>> {
        self.reducers
            .get(id)
            .cloned()
            .ok_or_else(|| DfsError::UnknownFunction(format!("reducer {}", id)))
    }
}

/* =========================
   Emisor con cancelación
   ========================= */

struct TaskEmitter<'a> {
    out: &'a mut Vec<Pair>,
    cancel: &'a AtomicBool,
}

impl Emitter for TaskEmitter<'_> {
    fn emit(&mut self, key: String, value: Value) -> anyhow::Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(anyhow!("tarea cancelada"));
        }
        self.out.push((key, value));
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic sin mensaje".to_string()
    }
}

/// Corre `body` atrapando errores y panics de la función del usuario.
fn guarded<T>(
    function: &str,
    cancel: &AtomicBool,
    body: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, TaskError> {
    let res = catch_unwind(AssertUnwindSafe(body));

    if cancel.load(Ordering::SeqCst) {
        return Err(TaskError::Cancelled);
    }

    match res {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(TaskError::UserFunction {
            function: function.to_string(),
            message: format!("{:#}", e),
        }),
        Err(payload) => Err(TaskError::Panicked {
            function: function.to_string(),
            message: panic_message(payload),
        }),
    }
}

/* =========================
   Tareas
   ========================= */

/// Tarea map: aplica `mapper` a cada registro (offset, línea) y devuelve la
/// salida ya repartida en `reduce_partitions` cubetas por hash de clave.
pub fn execute_map(
    mapper_id: &str,
    mapper: &MapFn,
    records: &[InputRecord],
    reduce_partitions: u32,
    cancel: &CancelToken,
) -> Result<Vec<Vec<Pair>>, TaskError> {
    let out = guarded(mapper_id, cancel, || {
        let mut out: Vec<Pair> = Vec::new();
        let mut emitter = TaskEmitter {
            out: &mut out,
            cancel: cancel.as_ref(),
        };
        for rec in records {
            mapper(&rec.offset.to_string(), &rec.line, &mut emitter)?;
        }
        Ok(out)
    })?;

    Ok(partition_pairs(out, reduce_partitions))
}

/// Tarea reduce: recibe la partición ya ordenada por clave y llama a
/// `reducer` una vez por clave con todos sus valores.
pub fn execute_reduce(
    reducer_id: &str,
    reducer: &ReduceFn,
    sorted: Vec<Pair>,
    cancel: &CancelToken,
) -> Result<Vec<Pair>, TaskError> {
    guarded(reducer_id, cancel, || {
        let mut out: Vec<Pair> = Vec::new();
        let mut emitter = TaskEmitter {
            out: &mut out,
            cancel: cancel.as_ref(),
        };
        for (key, values) in group_sorted(sorted) {
            reducer(&key, &values, &mut emitter)?;
        }
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::engine::{sort_by_key, text_records};
    use serde_json::json;

    #[test]
    fn map_then_reduce_counts_words() {
        let reg = FunctionRegistry::with_builtins();
        let mapper = reg.mapper("wordcount").unwrap();
        let reducer = reg.reducer("sum").unwrap();
        let cancel = cancel_token();

        let records = text_records(b"a,b\na,c");
        let mut parts = execute_map("wordcount", mapper.as_ref(), &records, 1, &cancel).unwrap();
        assert_eq!(parts.len(), 1);

        let mut part = parts.remove(0);
        sort_by_key(&mut part);
        let out = execute_reduce("sum", reducer.as_ref(), part, &cancel).unwrap();

        assert_eq!(
            out,
            vec![
                ("a".to_string(), json!(2)),
                ("b".to_string(), json!(1)),
                ("c".to_string(), json!(1)),
            ]
        );
    }

    #[test]
    fn unknown_function_is_reported() {
        let reg = FunctionRegistry::with_builtins();
        assert!(matches!(reg.mapper("nope"), Err(DfsError::UnknownFunction(_))));
        assert!(matches!(reg.reducer("nope"), Err(DfsError::UnknownFunction(_))));
    }

    #[test]
    fn user_error_becomes_task_failure() {
        let mut reg = FunctionRegistry::new();
        reg.register_mapper("roto", |_k, _v, _emit| Err(anyhow!("disco lleno")));
        let mapper = reg.mapper("roto").unwrap();

        let records = text_records(b"x");
        let err = execute_map("roto", mapper.as_ref(), &records, 2, &cancel_token()).unwrap_err();
        match err {
            TaskError::UserFunction { function, message } => {
                assert_eq!(function, "roto");
                assert!(message.contains("disco lleno"));
            }
            other => panic!("error inesperado: {other:?}"),
        }
    }

    #[test]
    fn panic_in_reducer_is_caught() {
        let mut reg = FunctionRegistry::new();
        reg.register_reducer("explota", |_k, _v, _emit| panic!("boom"));
        let reducer = reg.reducer("explota").unwrap();

        let err = execute_reduce(
            "explota",
            reducer.as_ref(),
            vec![("k".to_string(), json!(1))],
            &cancel_token(),
        )
        .unwrap_err();
        assert!(matches!(err, TaskError::Panicked { ref message, .. } if message == "boom"));
    }

    #[test]
    fn cancelled_task_stops_emitting() {
        let reg = FunctionRegistry::with_builtins();
        let mapper = reg.mapper("wordcount").unwrap();
        let cancel = cancel_token();
        cancel.store(true, Ordering::SeqCst);

        let records = text_records(b"a,b");
        let err = execute_map("wordcount", mapper.as_ref(), &records, 1, &cancel).unwrap_err();
        assert!(matches!(err, TaskError::Cancelled));
    }

    #[test]
    fn empty_partition_reduces_to_nothing() {
        let reg = FunctionRegistry::with_builtins();
        let reducer = reg.reducer("sum").unwrap();
        let out = execute_reduce("sum", reducer.as_ref(), Vec::new(), &cancel_token()).unwrap();
        assert!(out.is_empty());
    }
}
