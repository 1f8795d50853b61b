use super::{Result, ZoneError, ZoneRecord, constants};
use crate::dns::enums::{DNSResourceClass, DNSResourceType};
use crate::dns::name;
use crate::dns::resource::DNSResource;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Classification of a lookup, mapped to a response shape by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// Records of the requested type were found
    Success,
    /// The name exists but holds no records of the requested type
    NoData,
    /// The name does not exist
    NameError,
    /// The name sits at or below a zone cut
    Delegation,
    /// The zone cannot answer
    ServerFailure,
}

/// Records produced by [`Zone::lookup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub answer: Vec<DNSResource>,
    pub authority: Vec<DNSResource>,
    pub additional: Vec<DNSResource>,
    pub result: LookupResult,
}

impl Lookup {
    fn empty(result: LookupResult) -> Self {
        Self {
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            result,
        }
    }
}

/// Difference between two consecutive versions of a zone, used for IXFR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneDelta {
    pub from_serial: u32,
    pub to_serial: u32,
    pub old_soa: DNSResource,
    pub new_soa: DNSResource,
    pub removed: Vec<DNSResource>,
    pub added: Vec<DNSResource>,
}

/// Immutable record set of one zone.
///
/// A `Zone` is built once from parsed records and shared through
/// `Arc<Zone>`; reloading builds a new value instead of mutating this one.
#[derive(Debug, Clone)]
pub struct Zone {
    /// Zone origin, lowercase FQDN (`example.com.`)
    pub origin: String,
    /// Serial number from the SOA record
    pub serial: u32,
    /// TTL used for records that did not specify one
    pub default_ttl: u32,
    /// Zone file the zone was loaded from
    pub file_path: Option<PathBuf>,
    pub loaded_at: SystemTime,
    soa: DNSResource,
    /// All records except the SOA, indexed by owner
    records: BTreeMap<String, Vec<DNSResource>>,
    /// Owners plus every empty non-terminal between them and the origin
    names: HashSet<String>,
    /// Addresses of out-of-zone name servers
    glue: HashMap<String, Vec<DNSResource>>,
    journal: Vec<ZoneDelta>,
}

/// RFC 1982 comparison: is `a` newer than `b`
pub fn serial_gt(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000_0000
}

impl Zone {
    /// Build a zone from parsed records.
    ///
    /// Exactly one SOA owned by the origin is required. Out-of-zone owners,
    /// classes other than IN and CNAMEs sharing an owner with other data are
    /// rejected. Records with the same data are merged.
    pub fn from_records(
        origin: &str,
        zone_records: Vec<ZoneRecord>,
        default_ttl: Option<u32>,
    ) -> Result<Self> {
        let origin = name::fqdn(origin);
        if !name::is_valid_fqdn(&origin) {
            return Err(ZoneError::InvalidDomainName(origin));
        }

        // Records without a TTL fall back to $TTL, then to the SOA minimum
        let soa_minimum = zone_records
            .iter()
            .find(|r| r.rtype == DNSResourceType::SOA)
            .and_then(|r| r.to_dns_resource(0).ok())
            .and_then(|soa| soa.soa_minimum());
        let default_ttl = default_ttl
            .or(soa_minimum)
            .unwrap_or(constants::DEFAULT_TTL);

        let mut soa: Option<DNSResource> = None;
        let mut records: BTreeMap<String, Vec<DNSResource>> = BTreeMap::new();

        for zone_record in &zone_records {
            let owner = name::fqdn(&zone_record.name);
            if !name::is_subdomain(&origin, &owner) {
                return Err(ZoneError::OutOfZone {
                    name: owner,
                    origin,
                });
            }
            if zone_record.class != DNSResourceClass::IN {
                return Err(ZoneError::InvalidRecord(format!(
                    "{}: only class IN is served",
                    owner
                )));
            }

            let resource = zone_record.to_dns_resource(default_ttl)?;

            if resource.rtype == DNSResourceType::SOA {
                if owner != origin {
                    return Err(ZoneError::SOAOwnerMismatch { owner, origin });
                }
                if soa.is_some() {
                    return Err(ZoneError::DuplicateSOA);
                }
                soa = Some(resource);
                continue;
            }

            let rrs = records.entry(owner).or_default();
            if !rrs.iter().any(|existing| existing.same_data(&resource)) {
                rrs.push(resource);
            }
        }

        let soa = soa.ok_or(ZoneError::MissingSOA)?;
        let serial = soa.soa_serial().ok_or_else(|| {
            ZoneError::InvalidRecord(format!("{}: malformed SOA", origin))
        })?;

        for (owner, rrs) in &records {
            let has_cname = rrs.iter().any(|r| r.rtype == DNSResourceType::CNAME);
            if has_cname && (rrs.len() > 1 || *owner == origin) {
                return Err(ZoneError::CNAMEConflict(owner.clone()));
            }
        }

        let mut names = HashSet::new();
        names.insert(origin.clone());
        for owner in records.keys() {
            let mut current = Some(owner.clone());
            while let Some(n) = current {
                if n == origin || !names.insert(n.clone()) {
                    break;
                }
                current = name::parent(&n);
            }
        }

        debug!(
            "Built zone {} serial {} with {} owners",
            origin,
            serial,
            records.len()
        );

        Ok(Self {
            origin,
            serial,
            default_ttl,
            file_path: None,
            loaded_at: SystemTime::now(),
            soa,
            records,
            names,
            glue: HashMap::new(),
            journal: Vec::new(),
        })
    }

    pub fn with_source(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Attach addresses for out-of-zone name servers
    pub fn with_glue(mut self, glue: HashMap<String, Vec<DNSResource>>) -> Self {
        self.glue = glue;
        self
    }

    /// Carry the IXFR journal over from the zone this one replaces.
    ///
    /// A newer serial extends the journal with the difference between the
    /// two versions. An unchanged serial keeps the journal only while the
    /// content is identical; an edit without a serial bump or an older
    /// serial discards it, so IXFR falls back to a full transfer.
    pub fn with_history(mut self, previous: &Zone) -> Self {
        if self.serial == previous.serial {
            if self.same_content(previous) {
                self.journal = previous.journal.clone();
            } else {
                warn!(
                    "Zone {} changed without a serial bump ({}), dropping journal",
                    self.origin, self.serial
                );
            }
            return self;
        }
        if !serial_gt(self.serial, previous.serial) {
            debug!(
                "Serial of zone {} went backwards ({} -> {}), dropping journal",
                self.origin, previous.serial, self.serial
            );
            return self;
        }

        let old: HashSet<&DNSResource> = previous.records().collect();
        let new: HashSet<&DNSResource> = self.records().collect();

        let delta = ZoneDelta {
            from_serial: previous.serial,
            to_serial: self.serial,
            old_soa: previous.soa.clone(),
            new_soa: self.soa.clone(),
            removed: previous
                .records()
                .filter(|r| !new.contains(r))
                .cloned()
                .collect(),
            added: self.records().filter(|r| !old.contains(r)).cloned().collect(),
        };

        let mut journal = previous.journal.clone();
        journal.push(delta);
        if journal.len() > constants::MAX_JOURNAL_ENTRIES {
            let excess = journal.len() - constants::MAX_JOURNAL_ENTRIES;
            journal.drain(..excess);
        }
        self.journal = journal;
        self
    }

    fn same_content(&self, other: &Zone) -> bool {
        if self.soa != other.soa || self.record_count() != other.record_count() {
            return false;
        }
        let theirs: HashSet<&DNSResource> = other.records().collect();
        self.records().all(|r| theirs.contains(r))
    }

    pub fn soa(&self) -> &DNSResource {
        &self.soa
    }

    /// Every record except the SOA, apex first, then owners in order
    pub fn records(&self) -> impl Iterator<Item = &DNSResource> {
        self.records
            .get(&self.origin)
            .into_iter()
            .chain(
                self.records
                    .iter()
                    .filter(|(owner, _)| **owner != self.origin)
                    .map(|(_, rrs)| rrs),
            )
            .flatten()
    }

    /// Number of records including the SOA
    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum::<usize>() + 1
    }

    /// Journal entries leading from `serial` to the current serial, oldest
    /// first, or `None` when that history is not available
    pub fn deltas_since(&self, serial: u32) -> Option<&[ZoneDelta]> {
        let start = self.journal.iter().position(|d| d.from_serial == serial)?;
        let chain = &self.journal[start..];
        let contiguous = chain.windows(2).all(|w| w[0].to_serial == w[1].from_serial);
        let current = chain.last().is_some_and(|d| d.to_serial == self.serial);
        (contiguous && current).then_some(chain)
    }

    /// Name server targets outside this zone, whose addresses must come
    /// from a resolver
    pub fn external_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .records()
            .filter(|r| r.rtype == DNSResourceType::NS)
            .filter_map(|r| r.target_name())
            .filter(|target| !name::is_subdomain(&self.origin, target))
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    fn rrset(&self, owner: &str, rtype: DNSResourceType) -> Vec<DNSResource> {
        self.records
            .get(owner)
            .map(|rrs| {
                rrs.iter()
                    .filter(|r| rtype == DNSResourceType::ANY || r.rtype == rtype)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// SOA for negative answers, with TTL capped by the SOA minimum
    fn negative_soa(&self) -> DNSResource {
        let mut soa = self.soa.clone();
        if let Some(minimum) = soa.soa_minimum() {
            soa.ttl = soa.ttl.min(minimum);
        }
        soa
    }

    /// Answer `qname`/`qtype` from this zone
    pub fn lookup(&self, qname: &str, qtype: DNSResourceType) -> Lookup {
        let qname = name::fqdn(qname);
        if !name::is_subdomain(&self.origin, &qname) {
            return Lookup::empty(LookupResult::ServerFailure);
        }

        let mut visited = HashSet::new();
        self.resolve(&qname, qtype, &mut visited)
    }

    fn resolve(
        &self,
        qname: &str,
        qtype: DNSResourceType,
        visited: &mut HashSet<String>,
    ) -> Lookup {
        if !visited.insert(qname.to_string()) || visited.len() > constants::MAX_CNAME_CHAIN {
            debug!("CNAME chain too long or looping at {}", qname);
            return Lookup::empty(LookupResult::ServerFailure);
        }

        if let Some(referral) = self.find_delegation(qname, qtype) {
            return referral;
        }

        if qtype == DNSResourceType::SOA && qname == self.origin {
            return self.positive(vec![self.soa.clone()]);
        }

        if self.records.contains_key(qname) {
            return self.answer_from(qname, qname, qtype, visited);
        }

        if self.names.contains(qname) {
            // Empty non-terminal
            return self.negative(LookupResult::NoData);
        }

        if let Some(wildcard) = self.find_wildcard(qname) {
            return self.answer_from(&wildcard, qname, qtype, visited);
        }

        self.negative(LookupResult::NameError)
    }

    /// Referral when a zone cut sits between the origin and `qname`
    fn find_delegation(&self, qname: &str, qtype: DNSResourceType) -> Option<Lookup> {
        let labels = name::to_labels(qname);
        let depth = name::label_count(&self.origin);

        // Walk from just below the origin towards qname
        for take in (depth + 1)..=labels.len() {
            let candidate = name::from_labels(&labels[labels.len() - take..]);
            if candidate == qname && qtype == DNSResourceType::DS {
                // DS lives on the parent side of the cut
                break;
            }
            let ns = self.rrset(&candidate, DNSResourceType::NS);
            if ns.is_empty() {
                continue;
            }

            debug!("{} is delegated at {}", qname, candidate);
            let additional = self.addresses_for(&ns);
            return Some(Lookup {
                answer: Vec::new(),
                authority: ns,
                additional,
                result: LookupResult::Delegation,
            });
        }

        None
    }

    /// `*.<closest encloser>` when it exists
    fn find_wildcard(&self, qname: &str) -> Option<String> {
        let mut current = name::parent(qname);
        while let Some(ancestor) = current {
            if self.names.contains(&ancestor) {
                let wildcard = if ancestor == "." {
                    "*.".to_string()
                } else {
                    format!("*.{}", ancestor)
                };
                return self.records.contains_key(&wildcard).then_some(wildcard);
            }
            if ancestor == self.origin {
                break;
            }
            current = name::parent(&ancestor);
        }
        None
    }

    /// Answer from the records owned by `source`, presented as `qname`
    fn answer_from(
        &self,
        source: &str,
        qname: &str,
        qtype: DNSResourceType,
        visited: &mut HashSet<String>,
    ) -> Lookup {
        let synthesize = |rrs: Vec<DNSResource>| -> Vec<DNSResource> {
            if source == qname {
                rrs
            } else {
                rrs.iter().map(|r| r.with_owner(qname)).collect()
            }
        };

        let answer = synthesize(self.rrset(source, qtype));
        if !answer.is_empty() {
            return self.positive(answer);
        }

        let cname = synthesize(self.rrset(source, DNSResourceType::CNAME));
        if let Some(target) = cname.first().and_then(|r| r.target_name()) {
            if !name::is_subdomain(&self.origin, &target) {
                // Out of zone, the client follows the alias itself
                return self.positive(cname);
            }

            let mut chased = self.resolve(&target, qtype, visited);
            if chased.result == LookupResult::ServerFailure {
                return chased;
            }
            let mut answer = cname;
            answer.append(&mut chased.answer);
            chased.answer = answer;
            return chased;
        }

        self.negative(LookupResult::NoData)
    }

    fn positive(&self, answer: Vec<DNSResource>) -> Lookup {
        let asking_for_apex_ns = answer
            .iter()
            .all(|r| r.rtype == DNSResourceType::NS && r.owner() == self.origin);

        let authority = if asking_for_apex_ns {
            Vec::new()
        } else {
            self.rrset(&self.origin, DNSResourceType::NS)
        };

        let mut targets = answer.clone();
        targets.extend(authority.iter().cloned());
        let additional = self.addresses_for(&targets);

        Lookup {
            answer,
            authority,
            additional,
            result: LookupResult::Success,
        }
    }

    fn negative(&self, result: LookupResult) -> Lookup {
        Lookup {
            answer: Vec::new(),
            authority: vec![self.negative_soa()],
            additional: Vec::new(),
            result,
        }
    }

    /// A and AAAA records for the names referenced by NS, MX and SRV data
    fn addresses_for(&self, records: &[DNSResource]) -> Vec<DNSResource> {
        let mut additional: Vec<DNSResource> = Vec::new();

        for target in records.iter().filter_map(|r| match r.rtype {
            DNSResourceType::NS | DNSResourceType::MX | DNSResourceType::SRV => r.target_name(),
            _ => None,
        }) {
            let addresses = if name::is_subdomain(&self.origin, &target) {
                let mut found = self.rrset(&target, DNSResourceType::A);
                found.extend(self.rrset(&target, DNSResourceType::AAAA));
                found
            } else {
                self.glue.get(&target).cloned().unwrap_or_default()
            };

            for address in addresses {
                if !additional.iter().any(|r| r.same_data(&address)) {
                    additional.push(address);
                }
            }
        }

        additional
    }
}
