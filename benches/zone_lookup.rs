use autozone::dns::enums::{DNSResourceClass, DNSResourceType};
use autozone::dns::{DNSPacket, question::DNSQuestion};
use autozone::zone::{Zone, ZoneParser, ZoneTable};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

fn build_zone(origin: &str, hosts: usize) -> Zone {
    let mut text = String::from(
        "$TTL 300\n@ IN SOA ns1 hostmaster 1 3600 900 604800 60\n@ IN NS ns1\nns1 IN A 192.0.2.53\n",
    );
    for i in 0..hosts {
        text.push_str(&format!("host{} IN A 10.0.{}.{}\n", i, i / 256, i % 256));
    }
    let records = ZoneParser::new().parse_zone(&text, origin).unwrap();
    Zone::from_records(origin, records, None).unwrap()
}

fn bench_zone_lookup(c: &mut Criterion) {
    let zone = build_zone("example.test.", 10_000);

    c.bench_function("lookup existing name", |b| {
        b.iter(|| black_box(zone.lookup(black_box("host4242.example.test."), DNSResourceType::A)));
    });

    c.bench_function("lookup missing name", |b| {
        b.iter(|| black_box(zone.lookup(black_box("nothing.example.test."), DNSResourceType::A)));
    });
}

fn bench_find_zone(c: &mut Criterion) {
    let table = ZoneTable::new(["."]).unwrap();
    for i in 0..1_000 {
        let origin = format!("zone{}.test.", i);
        table.replace(&origin, Arc::new(build_zone(&origin, 4)));
    }

    c.bench_function("find zone among 1000", |b| {
        b.iter(|| black_box(table.find_zone(black_box("www.deep.zone999.test."))));
    });
}

fn bench_response_encoding(c: &mut Criterion) {
    let zone = build_zone("example.test.", 100);
    let query = DNSPacket::query(
        1,
        DNSQuestion::new("host42.example.test.", DNSResourceType::A, DNSResourceClass::IN),
    );
    let lookup = zone.lookup("host42.example.test.", DNSResourceType::A);
    let mut response = DNSPacket::reply_to(&query);
    response.compress = true;
    response.answers = lookup.answer;
    response.authorities = lookup.authority;
    response.resources = lookup.additional;

    c.bench_function("serialize answer", |b| {
        b.iter(|| black_box(response.serialize().unwrap()));
    });
}

criterion_group!(benches, bench_zone_lookup, bench_find_zone, bench_response_encoding);
criterion_main!(benches);
