/// Generic formatting code for a set of data extracted from a data structure to be presented
/// columnar, as csv, as awk input, or as json, and (except for json and awk) with or without a
/// header and with or without named fields.
///
/// A formatter returns None for a value that is absent, eg the measurement of a failed cycle.
/// Absent values print as `-` except in json, where they are `null`.
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::io;

const ABSENT: &str = "-";

pub struct Help {
    pub fields: Vec<String>,
    pub aliases: Vec<(String, Vec<String>)>,
    pub defaults: String,
}

pub fn maybe_help<F>(fmt: &Option<String>, f: F) -> bool
where
    F: Fn() -> Help,
{
    if let Some(ref s) = fmt {
        if s.starts_with("help") {
            let mut help = f();
            println!("Syntax:\n  --fmt=(field|alias|control),...");
            println!("\nFields:");
            help.fields.sort();
            for f in help.fields {
                println!("  {f}");
            }
            if !help.aliases.is_empty() {
                println!("\nAliases:");
                help.aliases.sort();
                for (name, mut fields) in help.aliases {
                    fields.sort();
                    let explication = fields.join(",");
                    println!("  {name} --> {explication}");
                }
            }
            println!("\nDefaults:\n  {}", help.defaults);
            println!("\nControl:\n  awk\n  csv\n  csvnamed\n  fixed\n  json\n  header\n  noheader\n  tag:<tagvalue>");
            return true;
        }
    }
    false
}

/// Return a vector of the known fields in `spec` wrt the formatters, and a HashSet of any other
/// strings found in `spec`.  It returns an error if zero output fields were selected.

pub fn parse_fields<'a, DataT, FmtT, CtxT>(
    spec: &'a str,
    formatters: &HashMap<String, FmtT>,
    aliases: &'a HashMap<String, Vec<String>>,
) -> Result<(Vec<&'a str>, HashSet<&'a str>)>
where
    FmtT: Fn(&DataT, CtxT) -> Option<String>,
    CtxT: Copy,
{
    let mut others = HashSet::new();
    let mut fields = vec![];
    for x in spec.split(',') {
        if formatters.contains_key(x) {
            fields.push(x);
        } else if let Some(aliases) = aliases.get(x) {
            for alias in aliases {
                if formatters.contains_key(alias) {
                    fields.push(alias.as_ref());
                } else {
                    others.insert(alias.as_ref());
                }
            }
        } else {
            others.insert(x);
        }
    }
    if fields.is_empty() {
        bail!("No output fields were selected")
    }
    Ok((fields, others))
}

/// A spec that names no fields or aliases, eg `csv,header`, gets `defaults` in front of it.
pub fn with_default_fields<FmtT>(
    spec: &str,
    defaults: &str,
    formatters: &HashMap<String, FmtT>,
    aliases: &HashMap<String, Vec<String>>,
) -> String {
    if spec
        .split(',')
        .any(|x| formatters.contains_key(x) || aliases.contains_key(x))
    {
        spec.to_string()
    } else {
        format!("{defaults},{spec}")
    }
}

pub struct FormatOptions {
    pub tag: Option<String>,
    pub json: bool,   // json explicitly requested
    pub csv: bool,    // csv or csvnamed explicitly requested
    pub awk: bool,    // awk explicitly requested
    pub fixed: bool,  // fixed output explicitly requested
    pub named: bool,  // csvnamed explicitly requested
    pub header: bool, // true if nothing requested b/c fixed+header is default
}

/// `fixed` overrides every other output mode, then csv, json and awk in that order.
pub fn standard_options(others: &HashSet<&str>) -> FormatOptions {
    let fixed = others.contains("fixed");
    let csvnamed = others.contains("csvnamed") && !fixed;
    let csv = (others.contains("csv") || csvnamed) && !fixed;
    let json = others.contains("json") && !csv && !fixed;
    let awk = others.contains("awk") && !csv && !json && !fixed;
    // json and awk get no header, even if one is requested
    let header =
        (!csv && !json && !awk && !others.contains("noheader")) || (csv && others.contains("header"));
    let tag = others
        .iter()
        .find_map(|x| x.strip_prefix("tag:"))
        .map(|t| t.to_string());
    FormatOptions {
        csv,
        json,
        awk,
        fixed,
        header,
        tag,
        named: csvnamed,
    }
}

/// The `fields` are the names of formatting functions to get from the `formatters`, these are
/// applied to the `data`.  Set `opts.header` to true to print a first row with field names as a
/// header (independent of csv).  Set `opts.csv` to true to get CSV output instead of fixed-format.
/// Set `opts.tag` to Some(s) to print a tag=s field in the output.

pub fn format_data<'a, DataT, FmtT, CtxT>(
    output: &mut dyn io::Write,
    fields: &[&'a str],
    formatters: &HashMap<String, FmtT>,
    opts: &FormatOptions,
    data: &[DataT],
    ctx: CtxT,
) -> Result<()>
where
    FmtT: Fn(&DataT, CtxT) -> Option<String>,
    CtxT: Copy,
{
    let mut fns = vec![];
    for kwd in fields {
        match formatters.get(*kwd) {
            Some(f) => fns.push(f),
            None => bail!("Unknown field {kwd}"),
        }
    }
    let mut cols = vec![Vec::<Option<String>>::with_capacity(data.len()); fields.len()];
    for x in data {
        for (col, f) in cols.iter_mut().zip(&fns) {
            col.push(f(x, ctx));
        }
    }

    if opts.csv {
        format_csv(output, fields, opts, cols)
    } else if opts.json {
        format_json(output, fields, opts, cols)
    } else if opts.awk {
        format_awk(output, fields, opts, cols);
        Ok(())
    } else {
        format_fixed_width(output, fields, opts, cols);
        Ok(())
    }
}

fn text(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or(ABSENT)
}

fn num_rows(cols: &[Vec<Option<String>>]) -> usize {
    cols.first().map(|c| c.len()).unwrap_or_default()
}

fn format_fixed_width(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<Option<String>>>,
) {
    // The column width is the max across all the entries in the column (including header,
    // if present).  If there's a tag, it is printed in the last column.
    let mut widths = vec![0; fields.len() + if opts.tag.is_some() { 1 } else { 0 }];

    if opts.header {
        for (i, kwd) in fields.iter().enumerate() {
            widths[i] = usize::max(widths[i], kwd.len());
        }
        if opts.tag.is_some() {
            widths[fields.len()] = usize::max(widths[fields.len()], "tag".len());
        }
    }

    for row in 0..num_rows(&cols) {
        for (col, c) in cols.iter().enumerate() {
            widths[col] = usize::max(widths[col], text(&c[row]).len());
        }
        if let Some(ref tag) = opts.tag {
            widths[fields.len()] = usize::max(widths[fields.len()], tag.len());
        }
    }

    // Header
    if opts.header {
        let mut s = "".to_string();
        for (i, kwd) in fields.iter().enumerate() {
            let w = widths[i];
            s += format!("{:w$}  ", kwd).as_str();
        }
        if opts.tag.is_some() {
            let w = widths[fields.len()];
            s += format!("{:w$}  ", "tag").as_str();
        }
        // Ignore errors here, they are common for broken pipelines
        let _ = output.write(s.trim_end().as_bytes());
        let _ = output.write(b"\n");
    }

    // Body
    for row in 0..num_rows(&cols) {
        let mut s = "".to_string();
        for (col, c) in cols.iter().enumerate() {
            let w = widths[col];
            s += format!("{:w$}  ", text(&c[row])).as_str();
        }
        if let Some(ref tag) = opts.tag {
            let w = widths[fields.len()];
            s += format!("{:w$}  ", tag).as_str();
        }
        // Ignore errors here, they are common for broken pipelines
        let _ = output.write(s.trim_end().as_bytes());
        let _ = output.write(b"\n");
    }
}

fn format_csv(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<Option<String>>>,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);

    if opts.header {
        let mut out_fields = fields.iter().map(|f| f.to_string()).collect::<Vec<String>>();
        if opts.tag.is_some() {
            out_fields.push("tag".to_string());
        }
        writer.write_record(out_fields)?;
    }

    for row in 0..num_rows(&cols) {
        let mut out_fields = Vec::new();
        for (col, c) in cols.iter().enumerate() {
            let val = text(&c[row]);
            if opts.named {
                out_fields.push(format!("{}={}", fields[col], val));
            } else {
                out_fields.push(val.to_string());
            }
        }
        if let Some(ref tag) = opts.tag {
            if opts.named {
                out_fields.push(format!("tag={tag}"));
            } else {
                out_fields.push(tag.clone());
            }
        }
        writer.write_record(out_fields)?;
    }

    writer.flush()?;
    Ok(())
}

fn format_json(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<Option<String>>>,
) -> Result<()> {
    let mut objects = vec![];
    for row in 0..num_rows(&cols) {
        let mut obj = serde_json::Map::new();
        for (col, c) in cols.iter().enumerate() {
            let val = match &c[row] {
                Some(s) => serde_json::Value::String(s.clone()),
                None => serde_json::Value::Null,
            };
            obj.insert(fields[col].to_string(), val);
        }
        if let Some(ref tag) = opts.tag {
            obj.insert("tag".to_string(), serde_json::Value::String(tag.clone()));
        }
        objects.push(serde_json::Value::Object(obj));
    }
    serde_json::to_writer(&mut *output, &objects)?;
    let _ = output.write(b"\n");
    Ok(())
}

// awk output: fields are space-separated and spaces are not allowed within fields, they
// are replaced by `_`.

fn format_awk(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<Option<String>>>,
) {
    for row in 0..num_rows(&cols) {
        let mut line = "".to_string();
        for c in cols.iter().take(fields.len()) {
            if !line.is_empty() {
                line += " ";
            }
            line += text(&c[row]).replace(' ', "_").as_str();
        }
        if let Some(ref tag) = opts.tag {
            if !line.is_empty() {
                line += " ";
            }
            line += tag;
        }
        line += "\n";
        // Ignore errors here, they are common for broken pipelines
        let _ = output.write(line.as_bytes());
    }
}

#[cfg(test)]
type TestDatum = (u32, Option<f64>);

#[cfg(test)]
fn test_formatters() -> HashMap<String, &'static dyn Fn(&TestDatum, ()) -> Option<String>> {
    fn cycle(d: &TestDatum, _: ()) -> Option<String> {
        Some(d.0.to_string())
    }
    fn value(d: &TestDatum, _: ()) -> Option<String> {
        d.1.map(|v| v.to_string())
    }
    let mut formatters: HashMap<String, &'static dyn Fn(&TestDatum, ()) -> Option<String>> =
        HashMap::new();
    formatters.insert("cycle".to_string(), &cycle);
    formatters.insert("value".to_string(), &value);
    formatters
}

#[cfg(test)]
fn render(spec: &str) -> String {
    let formatters = test_formatters();
    let aliases = HashMap::from([(
        "all".to_string(),
        vec!["cycle".to_string(), "value".to_string()],
    )]);
    let (fields, others) = parse_fields(spec, &formatters, &aliases).unwrap();
    let opts = standard_options(&others);
    let mut out = Vec::new();
    format_data(
        &mut out,
        &fields,
        &formatters,
        &opts,
        &[(1, Some(0.5)), (2, None)],
        (),
    )
    .unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_fixed() {
    assert!(render("all") == "cycle  value\n1      0.5\n2      -\n");
    assert!(render("value,noheader") == "0.5\n-\n");
}

#[test]
fn test_csv_json_awk() {
    assert!(render("cycle,value,csv") == "1,0.5\n2,-\n");
    assert!(render("cycle,value,csvnamed,tag:x") == "cycle=1,value=0.5,tag=x\ncycle=2,value=-,tag=x\n");
    assert!(render("cycle,value,json") == "[{\"cycle\":\"1\",\"value\":\"0.5\"},{\"cycle\":\"2\",\"value\":null}]\n");
    assert!(render("all,awk") == "1 0.5\n2 -\n");
}

#[test]
fn test_fixed_wins() {
    assert!(render("cycle,value,fixed,json") == "cycle  value\n1      0.5\n2      -\n");
    assert!(render("cycle,fixed,csv,noheader") == "1\n2\n");
    let opts = standard_options(&HashSet::from(["fixed", "awk", "csvnamed"]));
    assert!(opts.fixed && !opts.csv && !opts.named && !opts.awk && !opts.json);
}

#[test]
fn test_no_fields() {
    let formatters = test_formatters();
    let aliases = HashMap::new();
    assert!(parse_fields("csv,header", &formatters, &aliases).is_err());

    let spec = with_default_fields("csv,header", "cycle,value", &formatters, &aliases);
    assert!(spec == "cycle,value,csv,header");
    let (fields, _) = parse_fields(&spec, &formatters, &aliases).unwrap();
    assert!(fields == vec!["cycle", "value"]);
    assert!(with_default_fields("value,csv", "cycle", &formatters, &aliases) == "value,csv");
}
