use crate::error::SimError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;

/// Output of a run: the time array and one value array per variable, all of
/// equal length and indexed identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    ts: Vec<f64>,
    vars: Vec<String>,
    values: HashMap<String, Vec<f64>>,
}

impl TimeSeries {
    /// Builds a series from per-variable columns given in `vars` order.
    pub(crate) fn from_columns(ts: Vec<f64>, vars: Vec<String>, columns: Vec<Vec<f64>>) -> Self {
        let values = vars.iter().cloned().zip(columns).collect();
        Self { ts, vars, values }
    }

    pub fn ts(&self) -> &[f64] {
        &self.ts
    }

    /// Variable names in evaluation order.
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.values.get(name).map(Vec::as_slice)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.ts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts.is_empty()
    }

    /// `(name, values)` pairs in evaluation order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.vars
            .iter()
            .filter_map(|name| Some((name.as_str(), self.get(name)?)))
    }

    /// Values of every variable at the last step, or `None` for an empty run.
    pub fn last_state(&self) -> Option<Vec<f64>> {
        let last = self.ts.len().checked_sub(1)?;
        self.columns().map(|(_, values)| values.get(last).copied()).collect()
    }

    /// True when the variable only takes the values 0 and 1, and both occur.
    /// Plotting front ends draw such series as event markers.
    pub fn is_binary(&self, name: &str) -> bool {
        let Some(values) = self.get(name) else {
            return false;
        };
        let only_01 = values.iter().all(|&v| v == 0.0 || v == 1.0);
        only_01 && values.contains(&0.0) && values.contains(&1.0)
    }

    /// Writes a `t,<var>...` header followed by one row per step.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), SimError> {
        let mut csv = csv::Writer::from_writer(writer);
        let mut header = vec!["t".to_string()];
        header.extend(self.vars.iter().cloned());
        csv.write_record(&header)?;

        let columns: Vec<&[f64]> = self.columns().map(|(_, values)| values).collect();
        for (i, t) in self.ts.iter().enumerate() {
            let mut row = Vec::with_capacity(columns.len() + 1);
            row.push(t.to_string());
            row.extend(columns.iter().map(|column| column[i].to_string()));
            csv.write_record(&row)?;
        }
        csv.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}
