use super::record::qualify;
use super::{Result, ZoneError, ZoneRecord};
use crate::dns::enums::{DNSResourceClass, DNSResourceType};
use crate::dns::name;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Nested `$INCLUDE` levels accepted before giving up
const MAX_INCLUDE_DEPTH: usize = 8;

/// RFC 1035 zone file parser
pub struct ZoneParser {
    /// Current origin for relative names
    current_origin: String,
    /// Current default TTL set by `$TTL`
    current_ttl: Option<u32>,
    /// Owner of the previous record, inherited by lines starting with blanks
    last_owner: Option<String>,
    /// Line number for error reporting
    line_number: usize,
    /// Directory `$INCLUDE` paths are resolved against
    base_dir: Option<PathBuf>,
    include_depth: usize,
}

impl ZoneParser {
    /// Create a new zone parser
    pub fn new() -> Self {
        Self {
            current_origin: ".".to_string(),
            current_ttl: None,
            last_owner: None,
            line_number: 0,
            base_dir: None,
            include_depth: 0,
        }
    }

    /// Parser whose relative `$INCLUDE` paths resolve against `dir`
    pub fn with_base_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            base_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::new()
        }
    }

    /// Parse zone file contents for the zone `origin`
    pub fn parse_zone(&mut self, contents: &str, origin: &str) -> Result<Vec<ZoneRecord>> {
        self.current_origin = name::fqdn(origin);
        self.current_ttl = None;
        self.last_owner = None;
        self.line_number = 0;

        let mut records = Vec::new();
        self.parse_contents(contents, "<zone>", &mut records)?;

        debug!(
            "Parsed {} records for zone {}",
            records.len(),
            name::fqdn(origin)
        );
        Ok(records)
    }

    /// Default TTL from the last `$TTL` directive seen
    pub fn default_ttl(&self) -> Option<u32> {
        self.current_ttl
    }

    fn parse_contents(
        &mut self,
        contents: &str,
        source: &str,
        records: &mut Vec<ZoneRecord>,
    ) -> Result<()> {
        // Buffer for multi-line records
        let mut entry = String::new();
        let mut entry_start = 0;
        let mut depth: i32 = 0;

        for line in contents.lines() {
            self.line_number += 1;

            let line = strip_comments(line);
            if depth == 0 {
                if line.trim().is_empty() {
                    continue;
                }
                entry_start = self.line_number;
                entry.clear();
            } else {
                entry.push(' ');
            }

            trace!("Parsing line {}: {}", self.line_number, line);
            entry.push_str(line);
            depth += paren_balance(line);

            if depth < 0 {
                return Err(ZoneError::ParseError(format!(
                    "{} line {}: unbalanced ')'",
                    source, self.line_number
                )));
            }
            if depth > 0 {
                continue;
            }

            let result = if entry.trim_start().starts_with('$') {
                self.parse_directive(entry.trim(), records)
            } else {
                self.parse_record(&entry).map(|record| records.push(record))
            };

            result.map_err(|e| match e {
                ZoneError::ParseError(msg) if entry_start == self.line_number => {
                    ZoneError::ParseError(format!("{} line {}: {}", source, entry_start, msg))
                }
                ZoneError::ParseError(msg) => ZoneError::ParseError(format!(
                    "{} lines {}-{}: {}",
                    source, entry_start, self.line_number, msg
                )),
                other => other,
            })?;
        }

        if depth > 0 {
            return Err(ZoneError::ParseError(format!(
                "{}: unclosed parentheses starting at line {}",
                source, entry_start
            )));
        }

        Ok(())
    }

    /// Parse a directive line
    fn parse_directive(&mut self, line: &str, records: &mut Vec<ZoneRecord>) -> Result<()> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(());
        }

        match parts[0].to_uppercase().as_str() {
            "$ORIGIN" => {
                let origin = parts.get(1).ok_or_else(|| {
                    ZoneError::ParseError("$ORIGIN requires domain name".to_string())
                })?;
                let origin = qualify(origin, &self.current_origin);
                if !name::is_valid_fqdn(&origin) {
                    return Err(ZoneError::InvalidDomainName(origin));
                }
                debug!("Set origin to: {}", origin);
                self.current_origin = origin;
            }
            "$TTL" => {
                let value = parts
                    .get(1)
                    .ok_or_else(|| ZoneError::ParseError("$TTL requires value".to_string()))?;
                let ttl = parse_ttl(value)?;
                debug!("Set default TTL to: {}", ttl);
                self.current_ttl = Some(ttl);
            }
            "$INCLUDE" => {
                let include_path = parts.get(1).ok_or_else(|| {
                    ZoneError::ParseError("$INCLUDE requires file path".to_string())
                })?;
                let domain = parts.get(2).map(|d| qualify(d, &self.current_origin));
                self.include(include_path, domain, records)?;
            }
            "$GENERATE" => self.generate(&parts, records)?,
            _ => {
                debug!("Ignoring unknown directive: {}", parts[0]);
            }
        }

        Ok(())
    }

    fn include(
        &mut self,
        include_path: &str,
        domain: Option<String>,
        records: &mut Vec<ZoneRecord>,
    ) -> Result<()> {
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(ZoneError::ParseError(format!(
                "$INCLUDE nested deeper than {} levels",
                MAX_INCLUDE_DEPTH
            )));
        }

        let path = match &self.base_dir {
            Some(dir) if Path::new(include_path).is_relative() => dir.join(include_path),
            _ => PathBuf::from(include_path),
        };
        debug!("Processing $INCLUDE {} {:?}", path.display(), domain);

        let include_contents = fs::read_to_string(&path).map_err(|e| {
            ZoneError::ParseError(format!(
                "Failed to read include file {}: {}",
                path.display(),
                e
            ))
        })?;

        // Origin and owner are restored once the included file is done
        let saved_origin = self.current_origin.clone();
        let saved_owner = self.last_owner.take();
        let saved_line = self.line_number;
        if let Some(domain) = domain {
            self.current_origin = domain;
        }
        self.line_number = 0;
        self.include_depth += 1;

        let result = self.parse_contents(&include_contents, &path.display().to_string(), records);

        self.include_depth -= 1;
        self.line_number = saved_line;
        self.current_origin = saved_origin;
        self.last_owner = saved_owner;
        result
    }

    fn generate(&mut self, parts: &[&str], records: &mut Vec<ZoneRecord>) -> Result<()> {
        if parts.len() < 5 {
            return Err(ZoneError::ParseError(
                "$GENERATE requires range, lhs, type, and rhs".to_string(),
            ));
        }

        let (start, stop, step) = parse_generate_range(parts[1])?;
        let lhs = parts[2];
        let rtype = parse_type(parts[3])?;
        let rhs = parts[4..].join(" ");

        debug!(
            "Processing $GENERATE {}-{}/{} {} {} {}",
            start, stop, step, lhs, parts[3], rhs
        );

        let mut i = start;
        while i <= stop {
            // Format specifiers first, then plain `$`
            let owner = expand_generate_format(lhs, i)?.replace('$', &i.to_string());
            let rdata = expand_generate_format(&rhs, i)?.replace('$', &i.to_string());

            let owner = qualify(&owner, &self.current_origin);
            records.push(ZoneRecord::new(
                owner,
                self.current_ttl,
                DNSResourceClass::IN,
                rtype,
                rdata,
                self.current_origin.clone(),
            ));

            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }

        Ok(())
    }

    /// Parse one logical resource record entry
    fn parse_record(&mut self, entry: &str) -> Result<ZoneRecord> {
        let parts = tokenize(entry);
        if parts.is_empty() {
            return Err(ZoneError::ParseError("Empty record line".to_string()));
        }

        let mut idx = 0;

        // Entries starting with blanks inherit the previous owner
        let owner = if entry.starts_with(' ') || entry.starts_with('\t') {
            self.last_owner.clone().ok_or_else(|| {
                ZoneError::ParseError("No previous owner to inherit".to_string())
            })?
        } else {
            idx += 1;
            qualify(&parts[0], &self.current_origin)
        };

        if !name::is_valid_fqdn(&owner) {
            return Err(ZoneError::InvalidDomainName(owner));
        }

        let mut ttl = None;
        let mut class = None;
        let mut rtype = None;

        // TTL and class may appear in either order before the type
        while idx < parts.len() {
            let field = &parts[idx];
            idx += 1;

            if ttl.is_none()
                && field.starts_with(|c: char| c.is_ascii_digit())
                && let Ok(value) = parse_ttl(field)
            {
                ttl = Some(value);
                continue;
            }
            if class.is_none()
                && let Some(parsed) = parse_class(field)
            {
                class = Some(parsed);
                continue;
            }

            rtype = Some(parse_type(field)?);
            break;
        }

        let rtype =
            rtype.ok_or_else(|| ZoneError::ParseError("Missing record type".to_string()))?;

        if idx >= parts.len() {
            return Err(ZoneError::ParseError("Missing RDATA".to_string()));
        }
        let rdata = parts[idx..].join(" ");

        self.last_owner = Some(owner.clone());

        Ok(ZoneRecord::new(
            owner,
            ttl.or(self.current_ttl),
            class.unwrap_or(DNSResourceClass::IN),
            rtype,
            rdata,
            self.current_origin.clone(),
        ))
    }
}

impl Default for ZoneParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip a `;` comment, ignoring semicolons inside quoted strings
fn strip_comments(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;

    for (pos, ch) in line.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => return &line[..pos],
            _ => {}
        }
    }

    line
}

/// Net parentheses opened on a line, outside quoted strings
fn paren_balance(line: &str) -> i32 {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut balance = 0;

    for ch in line.chars() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => balance += 1,
            ')' if !in_quotes => balance -= 1,
            _ => {}
        }
    }

    balance
}

/// Split an entry on blanks, keeping quoted strings (with their quotes)
/// as single fields and dropping grouping parentheses
fn tokenize(entry: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in entry.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                escaped = true;
                current.push(ch);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '(' | ')' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Parse a TTL value; unit suffixes may be combined (`1h30m`)
pub(crate) fn parse_ttl(s: &str) -> Result<u32> {
    let invalid = || ZoneError::InvalidTTL(s.to_string());
    let lower = s.to_lowercase();

    if !lower.is_empty() && lower.chars().all(|c| c.is_ascii_digit()) {
        return lower.parse().map_err(|_| invalid());
    }

    let mut total: u32 = 0;
    let mut digits = String::new();
    for ch in lower.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            'w' => 604800,
            _ => return Err(invalid()),
        };
        let value: u32 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        total = value
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(invalid)?;
    }

    if !digits.is_empty() || lower.is_empty() {
        return Err(invalid());
    }

    Ok(total)
}

fn parse_class(s: &str) -> Option<DNSResourceClass> {
    match s.to_uppercase().as_str() {
        "IN" => Some(DNSResourceClass::IN),
        "CS" => Some(DNSResourceClass::CS),
        "CH" => Some(DNSResourceClass::CH),
        "HS" => Some(DNSResourceClass::HS),
        _ => None,
    }
}

fn parse_type(s: &str) -> Result<DNSResourceType> {
    match s.to_uppercase().as_str() {
        "A" => Ok(DNSResourceType::A),
        "NS" => Ok(DNSResourceType::NS),
        "CNAME" => Ok(DNSResourceType::CNAME),
        "SOA" => Ok(DNSResourceType::SOA),
        "PTR" => Ok(DNSResourceType::PTR),
        "MX" => Ok(DNSResourceType::MX),
        "TXT" => Ok(DNSResourceType::TXT),
        "AAAA" => Ok(DNSResourceType::AAAA),
        "SRV" => Ok(DNSResourceType::SRV),
        "CAA" => Ok(DNSResourceType::CAA),
        _ => Err(ZoneError::InvalidRRType(s.to_string())),
    }
}

/// Parse $GENERATE range specification (`start-stop[/step]`)
fn parse_generate_range(range_str: &str) -> Result<(u32, u32, u32)> {
    let (range, step) = match range_str.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (range_str, None),
    };

    let (start_str, stop_str) = range.split_once('-').ok_or_else(|| {
        ZoneError::ParseError("$GENERATE range must contain '-'".to_string())
    })?;

    let start = start_str.parse::<u32>().map_err(|_| {
        ZoneError::ParseError(format!("Invalid $GENERATE start: {}", start_str))
    })?;
    let stop = stop_str
        .parse::<u32>()
        .map_err(|_| ZoneError::ParseError(format!("Invalid $GENERATE stop: {}", stop_str)))?;
    let step = match step {
        Some(step) => step
            .parse::<u32>()
            .map_err(|_| ZoneError::ParseError(format!("Invalid $GENERATE step: {}", step)))?,
        None => 1,
    };

    if start > stop {
        return Err(ZoneError::ParseError(
            "$GENERATE start must be <= stop".to_string(),
        ));
    }
    if step == 0 {
        return Err(ZoneError::ParseError(
            "$GENERATE step must be > 0".to_string(),
        ));
    }

    Ok((start, stop, step))
}

/// Expand `${offset,width,base}` specifiers in a $GENERATE template
fn expand_generate_format(template: &str, value: u32) -> Result<String> {
    let mut result = String::new();
    let mut chars = template.chars();

    while let Some(ch) = chars.next() {
        if ch != '$' || !chars.as_str().starts_with('{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut spec = String::new();
        let mut found_close = false;
        for ch in chars.by_ref() {
            if ch == '}' {
                found_close = true;
                break;
            }
            spec.push(ch);
        }
        if !found_close {
            return Err(ZoneError::ParseError(
                "Unclosed ${} in $GENERATE".to_string(),
            ));
        }

        let parts: Vec<&str> = spec.split(',').collect();
        if parts.len() != 3 {
            return Err(ZoneError::ParseError(
                "Invalid $GENERATE format, expected ${offset,width,base}".to_string(),
            ));
        }

        let offset = parts[0]
            .parse::<u32>()
            .map_err(|_| ZoneError::ParseError(format!("Invalid offset: {}", parts[0])))?;
        let width = parts[1]
            .parse::<usize>()
            .map_err(|_| ZoneError::ParseError(format!("Invalid width: {}", parts[1])))?;

        let adjusted = value.saturating_add(offset);
        let formatted = match parts[2] {
            "d" => format!("{:0width$}", adjusted, width = width),
            "o" => format!("{:0width$o}", adjusted, width = width),
            "x" => format!("{:0width$x}", adjusted, width = width),
            "X" => format!("{:0width$X}", adjusted, width = width),
            base => {
                return Err(ZoneError::ParseError(format!(
                    "Invalid base '{}', expected d, o, x, or X",
                    base
                )));
            }
        };
        result.push_str(&formatted);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(records: &[ZoneRecord], rtype: DNSResourceType) -> usize {
        records.iter().filter(|r| r.rtype == rtype).count()
    }

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl("300").unwrap(), 300);
        assert_eq!(parse_ttl("5m").unwrap(), 300);
        assert_eq!(parse_ttl("1h").unwrap(), 3600);
        assert_eq!(parse_ttl("1d").unwrap(), 86400);
        assert_eq!(parse_ttl("1w").unwrap(), 604800);
        assert_eq!(parse_ttl("1h30m").unwrap(), 5400);
        assert!(parse_ttl("h").is_err());
        assert!(parse_ttl("10x").is_err());
    }

    #[test]
    fn test_simple_zone_file() {
        let zone_content = r#"
$TTL 3600

@   IN  SOA ns1.example.com. admin.example.com. 2024010101 3600 900 604800 86400

@       IN  NS  ns1.example.com.
@       IN  NS  ns2.example.com.

@       IN  A   192.0.2.1
www     IN  A   192.0.2.2
mail    IN  A   192.0.2.3

@       IN  MX  10 mail.example.com.
        "#;

        let mut parser = ZoneParser::new();
        let records = parser.parse_zone(zone_content, "example.com").unwrap();

        assert_eq!(parser.default_ttl(), Some(3600));
        assert_eq!(count(&records, DNSResourceType::SOA), 1);
        assert_eq!(count(&records, DNSResourceType::NS), 2);
        assert_eq!(count(&records, DNSResourceType::A), 3);
        assert_eq!(count(&records, DNSResourceType::MX), 1);
        assert!(records.iter().any(|r| r.name == "www.example.com."));
        assert!(records.iter().all(|r| r.ttl == Some(3600)));
    }

    #[test]
    fn test_multi_line_soa_record() {
        let zone_content = r#"
$ORIGIN example.com.

@   IN  SOA ns1.example.com. admin.example.com. (
    2024010101          ; Serial
    3600                ; Refresh
    900                 ; Retry
    604800              ; Expire
    86400               ; Minimum TTL
)

@       IN  NS  ns1.example.com.
        "#;

        let mut parser = ZoneParser::new();
        let records = parser.parse_zone(zone_content, "example.com.").unwrap();

        let soa = records
            .iter()
            .find(|r| r.rtype == DNSResourceType::SOA)
            .unwrap();
        assert_eq!(soa.name, "example.com.");
        let resource = soa.to_dns_resource(3600).unwrap();
        assert_eq!(resource.soa_serial(), Some(2024010101));
    }

    #[test]
    fn test_multi_line_txt_record() {
        let zone_content = r#"
@   IN  TXT (
    "v=spf1 "
    "ip4:192.0.2.0/24 ; not a comment"
    "-all"
)
        "#;

        let mut parser = ZoneParser::new();
        let records = parser.parse_zone(zone_content, "example.com.").unwrap();

        assert_eq!(records.len(), 1);
        let txt = records[0].to_dns_resource(300).unwrap();
        // three character-strings
        assert_eq!(txt.rdata[0] as usize, "v=spf1 ".len());
        assert!(
            String::from_utf8_lossy(&txt.rdata).contains("ip4:192.0.2.0/24 ; not a comment")
        );
    }

    #[test]
    fn test_owner_inheritance_and_origin_change() {
        let zone_content = "www  300 IN A 192.0.2.1\n     IN AAAA 2001:db8::1\n$ORIGIN sub.example.com.\nhost A 192.0.2.9\n";

        let mut parser = ZoneParser::new();
        let records = parser.parse_zone(zone_content, "example.com.").unwrap();

        assert_eq!(records[1].name, "www.example.com.");
        assert_eq!(records[1].rtype, DNSResourceType::AAAA);
        assert_eq!(records[1].ttl, None);
        assert_eq!(records[0].ttl, Some(300));
        assert_eq!(records[2].name, "host.sub.example.com.");
    }

    #[test]
    fn test_unclosed_parentheses_error() {
        let zone_content = r#"
@   IN  SOA (
    ns1.example.com.
    admin.example.com.
    2024010101
    ; Missing closing parenthesis
        "#;

        let mut parser = ZoneParser::new();
        let error = parser.parse_zone(zone_content, "example.com.").unwrap_err();
        assert!(error.to_string().contains("unclosed parentheses"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let mut parser = ZoneParser::new();
        let result = parser.parse_zone("www IN BOGUS data\n", "example.com.");
        assert!(matches!(result, Err(ZoneError::InvalidRRType(_))));
    }

    #[test]
    fn test_include_directive_relative_path() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("hosts.inc"),
            "www     IN  A   192.0.2.100\nftp     IN  A   192.0.2.101\n",
        )
        .unwrap();

        let zone_content = "@ IN NS ns1.example.com.\n$INCLUDE hosts.inc\nmail IN A 192.0.2.2\n";

        let mut parser = ZoneParser::with_base_dir(temp_dir.path());
        let records = parser.parse_zone(zone_content, "example.com.").unwrap();

        assert_eq!(count(&records, DNSResourceType::A), 3);
        assert!(
            records
                .iter()
                .any(|r| r.name == "ftp.example.com." && r.rdata == "192.0.2.101")
        );
    }

    #[test]
    fn test_include_with_origin() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let include_path = temp_dir.path().join("subdomain.zone");
        fs::write(
            &include_path,
            "@       IN  A   192.0.2.200\nwww     IN  A   192.0.2.201\n",
        )
        .unwrap();

        let zone_content = format!(
            "@ IN A 192.0.2.1\n$INCLUDE {} sub.example.com.\nafter IN A 192.0.2.3\n",
            include_path.display()
        );

        let mut parser = ZoneParser::new();
        let records = parser.parse_zone(&zone_content, "example.com.").unwrap();

        assert!(records.iter().any(|r| r.name == "sub.example.com."));
        assert!(records.iter().any(|r| r.name == "www.sub.example.com."));
        // origin is restored after the include
        assert!(records.iter().any(|r| r.name == "after.example.com."));
    }

    #[test]
    fn test_include_file_not_found() {
        let mut parser = ZoneParser::new();
        let error = parser
            .parse_zone("$INCLUDE /nonexistent/file.zone\n", "example.com.")
            .unwrap_err();
        assert!(error.to_string().contains("Failed to read include file"));
    }

    #[test]
    fn test_generate_with_step_and_format() {
        let zone_content = "$GENERATE 2-10/2 host${0,3,d} A 192.0.2.$\n";

        let mut parser = ZoneParser::new();
        let records = parser.parse_zone(zone_content, "example.com.").unwrap();

        assert_eq!(records.len(), 5);
        assert!(
            records
                .iter()
                .any(|r| r.name == "host004.example.com." && r.rdata == "192.0.2.4")
        );
    }

    #[test]
    fn test_generate_range_validation() {
        let mut parser = ZoneParser::new();
        let error = parser
            .parse_zone("$GENERATE 10-5 host$ A 192.0.2.$\n", "example.com.")
            .unwrap_err();
        assert!(error.to_string().contains("start must be <= stop"));
    }
}
