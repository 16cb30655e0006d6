use hypermocker::{Bytes, Mock, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tilesmith::{
    ChannelActor, Error, HttpFetch, Request, Response, Worker, WorkerThread,
    source::{GEOJSON, GeoJsonLoadResult, LoadGeoJsonParameters, VECTOR},
    tile_id::{CanonicalTileId, OverscaledTileId, TileUid},
    vector_tile::{GeomType, VectorTile, VectorTileFeature, VectorTileLayer},
    worker_tile::{TileParameters, TileRequest},
};

fn worker() -> WorkerThread {
    let (actor, _dependency_requests) = ChannelActor::channel();
    WorkerThread::spawn(Worker::new(
        Arc::new(actor),
        Arc::new(HttpFetch::default()),
    ))
}

fn circles(source: &str, source_layer: &str) -> Request {
    Request::SetLayers(
        serde_json::from_value(json!([{
            "id": "dots",
            "type": "circle",
            "source": source,
            "source-layer": source_layer,
        }]))
        .unwrap(),
    )
}

fn towns() -> Bytes {
    let feature = VectorTileFeature {
        id: Some(42),
        kind: GeomType::Point,
        properties: json!({"name": "Bergen"}).as_object().cloned().unwrap(),
        geometry: vec![vec![[2048, 2048]]],
    };
    VectorTile::from_layer(VectorTileLayer::new("towns", vec![feature]))
        .encode()
        .into()
}

fn parameters(source: &str) -> TileParameters {
    TileParameters::new(
        TileUid(1),
        OverscaledTileId::canonical(CanonicalTileId::new(5, 16, 9)),
        source,
    )
}

#[tokio::test]
async fn vector_tiles_are_fetched_and_parsed() {
    let _ = env_logger::try_init();

    let mock = Mock::bind().await.unwrap();
    let request = mock.anticipate("/5/16/9.pbf").await;
    let worker = worker();
    worker.send("map", circles("osm", "towns")).await.unwrap();

    let load = worker.send(
        "map",
        Request::LoadTile {
            kind: VECTOR.to_owned(),
            parameters: parameters("osm").with_request(mock.url("/5/16/9.pbf")),
        },
    );
    let (response, ()) = futures::future::join(load, request.respond(towns())).await;

    let Response::Tile(Some(tile)) = response.unwrap() else {
        panic!("expected a tile");
    };
    assert_eq!(tile.parse_result.buckets.len(), 1);
    assert_eq!(tile.raw_tile_data, Some(towns()));
}

#[tokio::test]
async fn missing_tiles_are_fetch_errors() {
    let _ = env_logger::try_init();

    let mock = Mock::bind().await.unwrap();
    let request = mock.anticipate("/0/0/0.pbf").await;
    let worker = worker();

    let load = worker.send(
        "map",
        Request::LoadTile {
            kind: VECTOR.to_owned(),
            parameters: TileParameters::new(
                TileUid(2),
                OverscaledTileId::canonical(CanonicalTileId::new(0, 0, 0)),
                "osm",
            )
            .with_request(mock.url("/0/0/0.pbf")),
        },
    );
    let (response, ()) = futures::future::join(
        load,
        request.respond_with_status(StatusCode::NOT_FOUND),
    )
    .await;

    assert!(matches!(response, Err(Error::Fetch(_))));
}

#[tokio::test]
async fn geojson_is_fetched_by_url() {
    let _ = env_logger::try_init();

    let mock = Mock::bind().await.unwrap();
    let request = mock.anticipate("/stops.geojson").await;
    let worker = worker();
    worker
        .send("map", circles("stops", "_geojsonTileLayer"))
        .await
        .unwrap();

    let stops = json!({
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"line": 7},
             "geometry": {"type": "Point", "coordinates": [10.75, 59.91]}},
            {"type": "Feature", "properties": {"line": 12},
             "geometry": {"type": "Point", "coordinates": [5.32, 60.39]}}
        ]
    });
    let load = worker.send(
        "map",
        Request::LoadData(LoadGeoJsonParameters {
            source: "stops".to_owned(),
            request: Some(TileRequest {
                url: mock.url("/stops.geojson"),
            }),
            ..LoadGeoJsonParameters::default()
        }),
    );
    let (response, ()) =
        futures::future::join(load, request.respond(stops.to_string())).await;
    assert!(matches!(
        response,
        Ok(Response::Data(GeoJsonLoadResult { abandoned: false }))
    ));

    let tile = worker
        .send(
            "map",
            Request::LoadTile {
                kind: GEOJSON.to_owned(),
                parameters: TileParameters::new(
                    TileUid(3),
                    OverscaledTileId::canonical(CanonicalTileId::new(0, 0, 0)),
                    "stops",
                ),
            },
        )
        .await;
    let Ok(Response::Tile(Some(tile))) = tile else {
        panic!("expected a tile");
    };
    assert_eq!(tile.parse_result.buckets.len(), 1);
    assert!(tile.raw_tile_data.is_some());
}

#[tokio::test]
async fn requests_of_unknown_sources_fail() {
    let _ = env_logger::try_init();

    let worker = worker();
    let response = worker
        .send(
            "map",
            Request::LoadTile {
                kind: "lidar".to_owned(),
                parameters: parameters("scan"),
            },
        )
        .await;

    assert!(matches!(response, Err(Error::UnknownSource(_))));
    assert!(worker.is_running());
}
