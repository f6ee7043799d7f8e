use std::fs;

use doctor_directory_scraper::cleaning::Tidy;
use doctor_directory_scraper::dedup::dedupe_table;
use doctor_directory_scraper::geo::{CityArea, RegionTable};
use doctor_directory_scraper::location::{
    blank_garbage_locations, clean_location_value, is_garbage_location, GarbageRules,
    LocationCleaner, OfflineResolver, UNKNOWN_LOCATION,
};
use doctor_directory_scraper::{Config, Table};

const SCRAPED: &str = "\
name,speciality,degree,year_of_experience,location,city,dp_score,npv,consultation_fee,google_map_link,profile_url
Dr. Asha Rao,Dentist,BDS,10 years,Jayanagar,Bangalore,95,120,500,,https://www.practo.com/bangalore/doctor/asha
Dr. Asha Rao,Dentist,BDS,,,Bangalore,95,120,,,https://www.practo.com/bangalore/doctor/asha-2
Dr. Vikram,Cardiologist,\"MBBS, MD\",15 years,\"a,abbr,acronym,address,applet\",Bangalore,90,40,800,\"https://www.google.com/maps/place/13.03,77.59\",https://www.practo.com/bangalore/doctor/vikram
Dr. Neha,Dermatologist,MBBS,,div,Bangalore,,,600,\"https://www.google.com/maps/search/Dr.+Neha+a,abbr,acronym+Indiranagar\",https://www.practo.com/bangalore/doctor/neha
Dr. Omar,Urologist,MBBS,,\"span,div,p\",Bangalore,,,0,,https://www.practo.com/bangalore/doctor/omar
Dr. Lee,Urologist,MBBS,,,,,,0,,https://www.practo.com/bangalore/doctor/lee
";

fn offline_cleaner() -> LocationCleaner<OfflineResolver> {
    let regions = RegionTable::bangalore(CityArea::from(&Config::default().geo)).unwrap();
    LocationCleaner::new(OfflineResolver::new(regions))
}

#[tokio::test]
async fn location_cleaning_round_trips_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doctors.csv");
    let output = dir.path().join("doctors_cleaned.csv");
    fs::write(&input, SCRAPED).unwrap();

    let mut table = Table::read(&input).unwrap();
    let summary = offline_cleaner().clean_table(&mut table).await.unwrap();
    table.write(&output).unwrap();

    let cleaned = Table::read(&output).unwrap();
    assert_eq!(cleaned.headers, table.headers);
    let location = cleaned.column("location").unwrap();
    let got: Vec<&str> = (0..cleaned.len()).map(|r| cleaned.get(r, location)).collect();
    assert_eq!(
        got,
        vec![
            "Jayanagar",
            "Bangalore",
            "Yeshwanthpur",
            "Indiranagar",
            "Bangalore",
            UNKNOWN_LOCATION,
        ]
    );
    assert_eq!(summary.garbage_before, 5);
    assert_eq!(summary.from_coordinates, 1);
    assert_eq!(summary.from_search_url, 1);
    assert_eq!(summary.from_city, 2);
    assert_eq!(summary.unknown, 1);
}

#[test]
fn blanking_then_dedup_keeps_the_filled_row() {
    let mut table = Table::from_reader(SCRAPED.as_bytes()).unwrap();
    let blanked = blank_garbage_locations(&mut table, GarbageRules::simple()).unwrap();
    assert_eq!(blanked, 3);

    let stats = dedupe_table(&mut table).unwrap();
    assert_eq!(stats.collapsed, 1);
    let location = table.column("location").unwrap();
    let asha: Vec<&str> = (0..table.len())
        .filter(|&r| table.get(r, 0) == "Dr. Asha Rao")
        .map(|r| table.get(r, location))
        .collect();
    assert_eq!(asha, vec!["Jayanagar"]);
}

#[test]
fn tidy_fills_and_filters() {
    let mut table = Table::from_reader(SCRAPED.as_bytes()).unwrap();
    let summary = Tidy::new(&Config::default())
        .with_city_filter(Some("Bangalore".to_owned()))
        .run(&mut table)
        .unwrap();

    assert_eq!(summary.dedup.after, 5);
    assert_eq!(summary.filtered_out, 1);
    assert_eq!(table.len(), 4);
    let fee = table.column("consultation_fee").unwrap();
    assert!((0..table.len()).all(|r| table.get(r, fee).parse::<u32>().is_ok()));
}

#[test]
fn tag_soup_is_always_garbage() {
    let tags = ["a", "abbr", "div", "span", "section", "nav", "li", "ul", "strong"];
    for window in tags.windows(3) {
        let soup = window.join(",");
        assert!(is_garbage_location(&soup), "{soup}");
        let wrapped = format!("Clinic {} Road", soup);
        assert!(is_garbage_location(&wrapped), "{wrapped}");
    }
    assert!(is_garbage_location(&tags.join(",")));
}

#[test]
fn short_plain_addresses_are_kept_unchanged() {
    let samples = [
        "Koramangala",
        "Whitefield Main Road",
        "12th Main, HAL 2nd Stage, Indiranagar",
        "Jayanagar 9th Block (Near Ragigudda Temple)",
        "Sector-3, HSR Layout",
        "Dr. Rajkumar Road, Rajajinagar",
        "1st Cross, 5th Block, Koramangala, Bengaluru",
    ];
    for sample in samples {
        assert!(sample.len() < 100);
        assert!(!is_garbage_location(sample), "{sample}");
        assert_eq!(clean_location_value(sample), sample);
        assert_eq!(clean_location_value(&clean_location_value(sample)), sample);
    }
}
