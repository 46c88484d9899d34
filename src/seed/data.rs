//! Demonstration data for a fresh registry: five peatland clusters with
//! one monitoring site each, the classification vocabularies, and a small
//! set of owners, institutions and parcels.

use anyhow::Result;
use chrono::NaiveDate;

use crate::model::{
    HistoryCategory, Id, LookupKind, NewCluster, NewHistoryEntry, NewInstitution, NewLandParcel,
    NewLocation, NewLookupValue, NewPerson,
};
use crate::store::traits::*;

fn lookup(name: &str, description: &str) -> NewLookupValue {
    NewLookupValue {
        name: name.to_string(),
        description: Some(description.to_string()),
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("seed dates are valid")
}

async fn seed_lookups<S: Store>(
    store: &S,
    kind: LookupKind,
    values: &[(&str, &str)],
) -> Result<Vec<Id>> {
    let mut ids = Vec::with_capacity(values.len());
    for (name, description) in values {
        let value = store.create_lookup(kind, lookup(name, description)).await?;
        ids.push(value.id);
    }
    Ok(ids)
}

pub async fn load_seed_data<S: Store>(store: &S) -> Result<()> {
    if !store.list_clusters().await?.is_empty() {
        log::info!("registry already contains data, skipping seed");
        return Ok(());
    }

    let cluster_rows = [
        ("Nordmoor", "Moorgebiet im Norden"),
        ("Suedmoor", "Moorgebiet im Sueden"),
        ("Ostmoor", "Moorgebiet im Osten"),
        ("Westmoor", "Moorgebiet im Westen"),
        ("Zentralmoor", "Zentrales Moorgebiet"),
    ];
    let mut cluster_ids = Vec::new();
    for (name, description) in cluster_rows {
        let cluster = store
            .create_cluster(NewCluster {
                name: name.to_string(),
                description: Some(description.to_string()),
            })
            .await?;
        cluster_ids.push(cluster.id);
    }

    let usage_ids = seed_lookups(
        store,
        LookupKind::UsageTypes,
        &[
            ("Landwirtschaft", "Landwirtschaftliche Nutzung"),
            ("Forstwirtschaft", "Forstwirtschaftliche Nutzung"),
            ("Naturschutz", "Naturschutzgebiet"),
            ("Renaturierung", "Renaturierungsprojekt"),
            ("Torfabbau", "Torfabbaugebiet"),
            ("Brache", "Brachflaeche"),
        ],
    )
    .await?;
    seed_lookups(
        store,
        LookupKind::HydrologicalSituations,
        &[
            ("Nass", "Dauerhaft nasse Bedingungen"),
            ("Feucht", "Feuchte Bedingungen"),
            ("Wechselfeucht", "Wechselnd feuchte Bedingungen"),
            ("Trocken", "Trockene Bedingungen"),
            ("Ueberflutet", "Zeitweise ueberflutet"),
        ],
    )
    .await?;
    seed_lookups(
        store,
        LookupKind::SoilTypes,
        &[
            ("Hochmoortorf", "Torf aus Hochmooren"),
            ("Niedermoortorf", "Torf aus Niedermooren"),
            ("Anmoor", "Anmooriger Boden"),
            ("Torfmudde", "Torfmudde"),
            ("Mineralboden", "Mineralischer Boden"),
        ],
    )
    .await?;
    seed_lookups(
        store,
        LookupKind::VegetationTypes,
        &[
            ("Hochmoorvegetation", "Typische Hochmoorvegetation"),
            ("Niedermoorvegetation", "Typische Niedermoorvegetation"),
            ("Feuchtwiese", "Feuchtwiese"),
            ("Erlenbruchwald", "Erlenbruchwald"),
            ("Birkenbruchwald", "Birkenbruchwald"),
            ("Schilf", "Schilfbestand"),
        ],
    )
    .await?;
    seed_lookups(
        store,
        LookupKind::Roles,
        &[
            ("Eigentuemer", "Eigentuemer der Flaeche"),
            ("Bewirtschafter", "Bewirtschaftende Person"),
            ("Ansprechpartner", "Ansprechpartner vor Ort"),
        ],
    )
    .await?;

    let institution_rows: [(&str, &str, &str, &str, &str); 4] = [
        (
            "Universitaet Hamburg",
            "University",
            "Mittelweg 177",
            "Hamburg",
            "20148",
        ),
        (
            "Landesamt fuer Umwelt Brandenburg",
            "Government Agency",
            "Seeburger Chaussee 2",
            "Potsdam",
            "14476",
        ),
        (
            "NABU Deutschland",
            "NGO",
            "Charitestrasse 3",
            "Berlin",
            "10117",
        ),
        (
            "Thuenen-Institut",
            "Research Institute",
            "Bundesallee 50",
            "Braunschweig",
            "38116",
        ),
    ];
    let mut institution_ids = Vec::new();
    for (name, kind, address, city, postal_code) in institution_rows {
        let institution = store
            .create_institution(NewInstitution {
                name: name.to_string(),
                kind: Some(kind.to_string()),
                address: Some(address.to_string()),
                city: Some(city.to_string()),
                postal_code: Some(postal_code.to_string()),
                country: Some("Deutschland".to_string()),
                phone: None,
                email: None,
                website: None,
            })
            .await?;
        institution_ids.push(institution.id);
    }

    let person_rows: [(&str, &str, &str, &str, &str, Option<usize>); 4] = [
        ("Herr", "Hans", "Mueller", "Moorweg 12", "Biologe", Some(0)),
        (
            "Frau",
            "Maria",
            "Schmidt",
            "Torfstrasse 45",
            "Umweltwissenschaftlerin",
            Some(1),
        ),
        ("Herr", "Klaus", "Weber", "Am Moor 3", "Landwirt", None),
        (
            "Frau",
            "Sabine",
            "Fischer",
            "Moorheide 78",
            "Forstwirtin",
            Some(3),
        ),
    ];
    let mut person_ids = Vec::new();
    for (salutation, first_name, last_name, address, profession, institution) in person_rows {
        let person = store
            .create_person(NewPerson {
                salutation: Some(salutation.to_string()),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                address: Some(address.to_string()),
                city: None,
                postal_code: None,
                country: Some("Deutschland".to_string()),
                phone: None,
                email: None,
                iban: None,
                profession: Some(profession.to_string()),
                institution_id: institution.map(|i| institution_ids[i].clone()),
            })
            .await?;
        person_ids.push(person.id);
    }

    let parcel_rows: [(&str, f64, usize, &str); 4] = [
        (
            "123/45",
            10000.50,
            0,
            "POLYGON((10 10, 10 20, 20 20, 20 10, 10 10))",
        ),
        (
            "234/56",
            5000.75,
            1,
            "POLYGON((30 30, 30 40, 40 40, 40 30, 30 30))",
        ),
        (
            "345/67",
            7500.25,
            2,
            "POLYGON((50 50, 50 60, 60 60, 60 50, 50 50))",
        ),
        (
            "456/78",
            12000.00,
            3,
            "POLYGON((70 70, 70 80, 80 80, 80 70, 70 70))",
        ),
    ];
    let mut parcel_ids = Vec::new();
    for (parcel_number, area_size, owner, wkt) in parcel_rows {
        let parcel = store
            .create_parcel(NewLandParcel {
                parcel_number: parcel_number.to_string(),
                area_size: Some(area_size),
                owner_id: Some(person_ids[owner].clone()),
                address: None,
                city: None,
                postal_code: None,
                country: Some("Deutschland".to_string()),
                coordinates: Some(wkt.to_string()),
            })
            .await?;
        parcel_ids.push(parcel.id);
    }

    let location_rows: [(&str, &str, &str, usize); 5] = [
        (
            "Nordmoor-Standort 1",
            "Messstandort im noerdlichen Moorgebiet",
            "POINT(10.5 53.5)",
            0,
        ),
        (
            "Suedmoor-Standort 1",
            "Messstandort im suedlichen Moorgebiet",
            "POINT(13.5 52.5)",
            1,
        ),
        (
            "Ostmoor-Standort 1",
            "Messstandort im oestlichen Moorgebiet",
            "POINT(14.0 52.0)",
            2,
        ),
        (
            "Westmoor-Standort 1",
            "Messstandort im westlichen Moorgebiet",
            "POINT(9.5 53.0)",
            3,
        ),
        (
            "Zentralmoor-Standort 1",
            "Messstandort im zentralen Moorgebiet",
            "POINT(12.0 52.5)",
            4,
        ),
    ];
    let mut location_ids = Vec::new();
    for (name, description, wkt, cluster) in location_rows {
        let location = store
            .create_location(NewLocation {
                name: name.to_string(),
                description: Some(description.to_string()),
                coordinates: Some(wkt.to_string()),
                cluster_id: Some(cluster_ids[cluster].clone()),
            })
            .await?;
        location_ids.push(location.id);
    }

    for (location, parcel) in location_ids.iter().zip(parcel_ids.iter()) {
        store.link_parcel(location, parcel).await?;
    }

    // one closed and one open usage span per sampled location
    let usage_history = [
        (0, 0, date(2010, 1, 1), Some(date(2015, 12, 31))),
        (0, 2, date(2016, 1, 1), None),
        (1, 1, date(2012, 1, 1), Some(date(2018, 6, 30))),
        (1, 3, date(2018, 7, 1), None),
        (2, 4, date(2005, 1, 1), Some(date(2020, 12, 31))),
        (2, 3, date(2021, 1, 1), None),
    ];
    for (location, usage, start_date, end_date) in usage_history {
        store
            .append_history(
                HistoryCategory::Usage,
                &location_ids[location],
                NewHistoryEntry {
                    classification_id: usage_ids[usage].clone(),
                    start_date,
                    end_date,
                },
            )
            .await?;
    }

    log::info!(
        "seeded {} clusters, {} locations, {} parcels",
        cluster_ids.len(),
        location_ids.len(),
        parcel_ids.len()
    );
    Ok(())
}
