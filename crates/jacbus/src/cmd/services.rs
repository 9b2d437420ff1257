use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use jacbus_spec::{service_spec, ServiceSpec, SERVICES};

use crate::cmd::{parse_number, ServicesArgs};
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::OutputFormat;

pub fn run(args: ServicesArgs, format: OutputFormat) -> CliResult<i32> {
    if let Some(text) = &args.class {
        let class = parse_number(text)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| CliError::new(USAGE, format!("invalid class: {text}")))?;
        let spec = service_spec(class)
            .ok_or_else(|| CliError::new(USAGE, format!("class {class:#010x} not catalogued")))?;
        print_detail(spec, format);
        return Ok(SUCCESS);
    }

    let filter = args.filter.as_deref().unwrap_or("").to_ascii_lowercase();
    let matching: Vec<&ServiceSpec> = SERVICES
        .iter()
        .filter(|spec| spec.name.contains(&filter))
        .collect();

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&matching).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CLASS", "NAME", "REGS", "CMDS", "EVENTS"]);
            for spec in &matching {
                table.add_row(vec![
                    format!("{:#010x}", spec.class),
                    spec.name.to_string(),
                    spec.registers.len().to_string(),
                    spec.commands.len().to_string(),
                    spec.events.len().to_string(),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(SUCCESS)
}

fn print_detail(spec: &ServiceSpec, format: OutputFormat) {
    if matches!(format, OutputFormat::Json) {
        println!(
            "{}",
            serde_json::to_string(spec).unwrap_or_else(|_| "{}".to_string())
        );
        return;
    }

    println!("{} ({:#010x})", spec.name, spec.class);
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["KIND", "CODE", "NAME", "FORMAT"]);
    for reg in spec.registers {
        table.add_row(vec![
            "register".to_string(),
            format!("{:#05x}", reg.code),
            reg.name.to_string(),
            reg.fmt.to_string(),
        ]);
    }
    for cmd in spec.commands {
        table.add_row(vec![
            "command".to_string(),
            format!("{:#05x}", cmd.code),
            cmd.name.to_string(),
            cmd.fmt.to_string(),
        ]);
    }
    for event in spec.events {
        table.add_row(vec![
            "event".to_string(),
            format!("{:#05x}", event.code),
            event.name.to_string(),
            event.fmt.to_string(),
        ]);
    }
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_all_without_filter() {
        let args = ServicesArgs {
            filter: None,
            class: None,
        };
        assert_eq!(run(args, OutputFormat::Pretty).unwrap(), SUCCESS);
    }

    #[test]
    fn detail_for_known_class() {
        let args = ServicesArgs {
            filter: None,
            class: Some("0x1421bac7".into()),
        };
        assert_eq!(run(args, OutputFormat::Pretty).unwrap(), SUCCESS);
    }

    #[test]
    fn unknown_class_is_a_usage_error() {
        let args = ServicesArgs {
            filter: None,
            class: Some("0xdeadbeef".into()),
        };
        assert_eq!(run(args, OutputFormat::Pretty).unwrap_err().code, USAGE);
    }
}
