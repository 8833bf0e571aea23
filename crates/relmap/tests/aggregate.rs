//! Aggregates: relations cascaded across persisters and loaded by one select.

mod common;

use common::{
    City, Country, Kind, RecordingExecutor, city, city_persister, column, country,
    country_persister, row,
};
use relmap::prelude::*;

fn capital_of(country: &Country) -> Option<EntityRef<City>> {
    country.capital.clone()
}

fn set_capital(country: &mut Country, city: Option<EntityRef<City>>) {
    country.capital = city;
}

/// Countries with their cities, ordered by `City.idx`.
fn countries_with_cities() -> Persister<Country, i64> {
    let cities = city_persister();
    let fk = column(cities.table(), "countryId");
    let idx = column(cities.table(), "idx");
    let mut countries = country_persister();
    OneToMany::new(
        Arc::new(cities),
        &fk,
        |c: &Country| c.cities.clone(),
        |c: &mut Country, city| c.cities.push(city),
    )
    .indexed_by(&idx)
    .register(&mut countries)
    .unwrap();
    countries
}

/// Countries holding `capitalId`.
fn countries_with_capital(mandatory: bool) -> Persister<Country, i64> {
    let cities = Arc::new(city_persister());
    let mut countries = country_persister();
    let fk = column(countries.table(), "capitalId");
    let relation = OneToOne::owned_by_source(cities, &fk, capital_of, set_capital);
    let relation = if mandatory { relation.mandatory() } else { relation };
    relation.register(&mut countries).unwrap();
    countries
}

const LABELS: [&str; 4] = ["Country_id", "Country_name", "City_id", "City_name"];

fn france_row(city_id: i64, name: &str) -> Row {
    row(
        &LABELS,
        vec![
            Value::BigInt(1),
            Value::from("France"),
            Value::BigInt(city_id),
            Value::from(name),
        ],
    )
}

fn city_names(country: &EntityRef<Country>) -> Vec<String> {
    country
        .read()
        .cities
        .iter()
        .map(|c| c.read().name.clone())
        .collect()
}

#[test]
fn fan_out_rows_collapse_into_one_graph() {
    let countries = countries_with_cities();
    let executor = RecordingExecutor::new();
    executor.push_rows(vec![
        france_row(10, "Paris"),
        france_row(11, "Lyon"),
        france_row(10, "Paris"),
    ]);

    let loaded = countries.select(&executor, &[1]).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].read().name, "France");
    assert_eq!(city_names(&loaded[0]), vec!["Paris", "Lyon"]);

    let statements = executor.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].kind, Kind::Query);
    assert!(
        statements[0]
            .sql
            .contains("from Country left outer join City on Country.id = City.countryId")
    );
}

#[test]
fn root_without_related_rows_has_empty_collection() {
    let countries = countries_with_cities();
    let executor = RecordingExecutor::new();
    executor.push_rows(vec![row(
        &LABELS,
        vec![Value::BigInt(1), Value::from("France"), Value::Null, Value::Null],
    )]);
    let loaded = countries.select(&executor, &[1]).unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].read().cities.is_empty());
}

#[test]
fn separate_selects_build_equal_but_distinct_graphs() {
    let countries = countries_with_cities();
    let executor = RecordingExecutor::new();
    for _ in 0..2 {
        executor.push_rows(vec![france_row(10, "Paris"), france_row(11, "Lyon")]);
    }
    let first = countries.select(&executor, &[1]).unwrap();
    let second = countries.select(&executor, &[1]).unwrap();

    assert!(!first[0].ptr_eq(&second[0]));
    assert_eq!(first[0].read().id, second[0].read().id);
    assert_eq!(city_names(&first[0]), city_names(&second[0]));
    assert!(!first[0].read().cities[0].ptr_eq(&second[0].read().cities[0]));
}

#[test]
fn shared_cache_returns_the_same_instances() {
    let countries = countries_with_capital(false);
    let executor = RecordingExecutor::new();
    for _ in 0..2 {
        executor.push_rows(vec![france_row(10, "Paris")]);
    }
    let mut cache = IdentityCache::new();
    let first = countries
        .select_with_cache(&executor, &[1], &mut cache)
        .unwrap();
    let second = countries
        .select_with_cache(&executor, &[1], &mut cache)
        .unwrap();

    assert!(first[0].ptr_eq(&second[0]));
    let capital = second[0].read().capital.clone().unwrap();
    assert_eq!(capital.read().name, "Paris");
    assert!(cache.get_entity::<City>(&Value::BigInt(10)).is_some());
}

#[test]
fn mandatory_capital_is_inserted_before_its_country() {
    let countries = countries_with_capital(true);
    let executor = RecordingExecutor::new();
    let paris = city(0, "Paris");
    let france = country(1, "France");
    france.write().capital = Some(paris.clone());

    countries.insert(&executor, &[france]).unwrap();

    let statements = executor.statements();
    assert_eq!(
        executor.sql(),
        vec![
            "insert into City(name) values (?)",
            "insert into Country(id, name, capitalId) values (?, ?, ?)",
        ]
    );
    assert_eq!(statements[0].kind, Kind::Returning);
    let generated = paris.read().id;
    assert_eq!(generated, 100);
    assert_eq!(
        statements[1].bindings[0].get(&3),
        Some(&Value::BigInt(generated))
    );
}

#[test]
fn missing_mandatory_capital_fails_before_any_statement() {
    let countries = countries_with_capital(true);
    let executor = RecordingExecutor::new();
    let err = countries
        .insert(&executor, &[country(1, "France")])
        .unwrap_err();
    let Error::MandatoryRelation(missing) = err else {
        panic!("expected a mandatory relation error, got {err}");
    };
    assert_eq!(missing.entity, "Country");
    assert!(executor.statements().is_empty());
}

#[test]
fn silent_keys_do_not_outlive_a_failed_call() {
    let countries = countries_with_capital(false);
    let executor = RecordingExecutor::new();
    let paris = city(7, "Paris");
    let france = country(1, "France");
    france.write().capital = Some(paris);
    executor.fail_next(Error::Custom("connection lost".to_string()));

    let ctx = PersistContext::new(&executor);
    let err = countries.insert_in(&ctx, &[france]).unwrap_err();
    assert!(matches!(err, Error::Custom(ref m) if m == "connection lost"));
    assert!(ctx.silent().is_empty());
}

#[test]
fn removed_cities_are_detached_and_new_ones_inserted() {
    let countries = countries_with_cities();
    let executor = RecordingExecutor::new();
    let lyon = city(5, "Lyon");
    let nice = city(0, "Nice");
    let before = country(1, "France");
    before.write().cities = vec![lyon.clone()];
    let after = country(1, "France");
    after.write().cities = vec![nice.clone()];

    countries
        .update(&executor, &[UpdatePair::new(after, before)], false)
        .unwrap();

    assert_eq!(
        executor.sql(),
        vec![
            "update City set countryId = ?, idx = ? where id = ?",
            "insert into City(name, countryId, idx) values (?, ?, ?)",
        ]
    );
    let statements = executor.statements();
    let detach = &statements[0].bindings[0];
    assert_eq!(detach.get(&1), Some(&Value::Null));
    assert_eq!(detach.get(&2), Some(&Value::Null));
    assert_eq!(detach.get(&3), Some(&Value::BigInt(5)));
    assert_eq!(nice.read().id, 100);
}
