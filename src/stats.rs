/*!
Listening stats and the daily mix, built from a user's Spotify data
*/
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::spotify::client::{Artist, Track};
use crate::spotify::{PlayHistory, SpotifyConnector};
use crate::{utils, Error, Result, LOG};

const TOP_N: usize = 5;
const TOP_TRACKS: u32 = 20;
const SAVED_TRACKS: u32 = 50;
const MIX_SIZE: usize = 20;
const MIX_DESCRIPTION: &str = "Your daily mix of favorite tracks";
// spotify's page limit, used for every summary input
const SUMMARY_LIMIT: u32 = 50;
const AVG_TRACK_MINUTES: f64 = 3.5;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TopArtist {
    pub name: String,
    pub id: String,
    pub popularity: u32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TopAlbum {
    pub name: String,
    pub id: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TopGenre {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningStats {
    pub top_artists: Vec<TopArtist>,
    pub top_albums: Vec<TopAlbum>,
    pub top_genres: Vec<TopGenre>,
}

/// Rough listening figures. Spotify exposes no play counts, so plays
/// are estimated from the popularity of the top tracks.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotifySummary {
    pub total_plays: u64,
    pub hours_listened: f64,
    pub top_genre: String,
    pub avg_daily_plays: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMix {
    pub id: String,
    pub name: String,
    pub url: String,
    pub embed_url: String,
    pub track_count: usize,
}

/// Occurrences of each key, most frequent first. Equal counts keep
/// the order in which keys were first seen.
fn ranked<K, I>(keys: I) -> Vec<(K, usize)>
where
    K: std::hash::Hash + Eq + Clone,
    I: IntoIterator<Item = K>,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut counts: Vec<(K, usize)> = vec![];
    for key in keys {
        match index.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push((key, 1));
            }
        }
    }
    // sort_by is stable
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

pub fn summarize(artists: &[Artist], tracks: &[Track]) -> ListeningStats {
    let top_artists = artists
        .iter()
        .take(TOP_N)
        .map(|a| TopArtist {
            name: a.name.clone(),
            id: a.id.clone(),
            popularity: a.popularity,
        })
        .collect();

    let album_names: HashMap<&str, &str> = tracks
        .iter()
        .map(|t| (t.album.id.as_str(), t.album.name.as_str()))
        .collect();
    let top_albums = ranked(tracks.iter().map(|t| t.album.id.as_str()))
        .into_iter()
        .take(TOP_N)
        .map(|(id, count)| TopAlbum {
            name: album_names.get(id).copied().unwrap_or_default().to_string(),
            id: id.to_string(),
            count,
        })
        .collect();

    let top_genres = ranked(artists.iter().flat_map(|a| a.genres.iter()))
        .into_iter()
        .take(TOP_N)
        .map(|(name, count)| TopGenre {
            name: name.clone(),
            count,
        })
        .collect();

    ListeningStats {
        top_artists,
        top_albums,
        top_genres,
    }
}

/// Plays per day across the recently played window, which runs from
/// the oldest entry to `now` and counts as at least one day.
fn avg_daily_plays(recent: &[PlayHistory], now: DateTime<Utc>) -> f64 {
    let oldest = match recent.iter().map(|p| p.played_at).min() {
        Some(oldest) => oldest,
        None => return 0.0,
    };
    let days = (now - oldest).num_seconds() as f64 / 86_400.0;
    recent.len() as f64 / days.max(1.0)
}

pub fn listening_summary(
    artists: &[Artist],
    tracks: &[Track],
    recent: &[PlayHistory],
    now: DateTime<Utc>,
) -> SpotifySummary {
    let total_plays: u64 = tracks.iter().map(|t| t.popularity as u64).sum();
    let top_genre = ranked(artists.iter().flat_map(|a| a.genres.iter()))
        .into_iter()
        .next()
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    SpotifySummary {
        total_plays,
        hours_listened: total_plays as f64 * AVG_TRACK_MINUTES / 60.0,
        top_genre,
        avg_daily_plays: avg_daily_plays(recent, now),
    }
}

/// Shuffle `saved` and keep at most `size` tracks.
pub fn pick_daily_mix<R: Rng + ?Sized>(mut saved: Vec<Track>, rng: &mut R, size: usize) -> Vec<Track> {
    saved.shuffle(rng);
    saved.truncate(size);
    saved
}

pub fn daily_mix_name(date: NaiveDate) -> String {
    format!("Daily Mix - {}", utils::short_date(date))
}

pub fn embed_url(playlist_id: &str) -> String {
    format!("https://open.spotify.com/embed/playlist/{}", playlist_id)
}

pub async fn listening_stats(spotify: &SpotifyConnector, user_id: i64) -> Result<ListeningStats> {
    let artists = spotify
        .with_token(user_id, |api, token| async move {
            api.top_artists(&token, TOP_N as u32).await
        })
        .await?;
    let tracks = spotify
        .with_token(user_id, |api, token| async move {
            api.top_tracks(&token, TOP_TRACKS).await
        })
        .await?;
    Ok(summarize(&artists, &tracks))
}

pub async fn spotify_summary(spotify: &SpotifyConnector, user_id: i64) -> Result<SpotifySummary> {
    let tracks = spotify
        .with_token(user_id, |api, token| async move {
            api.top_tracks(&token, SUMMARY_LIMIT).await
        })
        .await?;
    let artists = spotify
        .with_token(user_id, |api, token| async move {
            api.top_artists(&token, SUMMARY_LIMIT).await
        })
        .await?;
    let recent = spotify
        .with_token(user_id, |api, token| async move {
            api.recently_played(&token, SUMMARY_LIMIT).await
        })
        .await?;
    Ok(listening_summary(&artists, &tracks, &recent, Utc::now()))
}

/// Build today's mix: a private playlist of up to 20 shuffled saved
/// tracks.
pub async fn daily_mix(spotify: &SpotifyConnector, user_id: i64, today: NaiveDate) -> Result<DailyMix> {
    let profile = spotify
        .with_token(user_id, |api, token| async move { api.me(&token).await })
        .await?;
    let saved = spotify
        .with_token(user_id, |api, token| async move {
            api.saved_tracks(&token, SAVED_TRACKS).await
        })
        .await?;
    if saved.is_empty() {
        return Err(Error::Validation(
            "No saved tracks found. Save some tracks on Spotify first!".to_string(),
        ));
    }

    let picked = pick_daily_mix(saved, &mut rand::rng(), MIX_SIZE);
    let uris: Vec<String> = picked.into_iter().map(|t| t.uri).collect();
    let name = daily_mix_name(today);

    let playlist = spotify
        .with_token(user_id, |api, token| {
            let owner = profile.id.clone();
            let name = name.clone();
            async move {
                api.create_playlist(&token, &owner, &name, MIX_DESCRIPTION)
                    .await
            }
        })
        .await?;
    spotify
        .with_token(user_id, |api, token| {
            let playlist_id = playlist.id.clone();
            let uris = uris.clone();
            async move { api.add_tracks(&token, &playlist_id, &uris).await }
        })
        .await?;
    slog::info!(
        LOG, "created daily mix";
        "user_id" => user_id, "playlist_id" => &playlist.id, "tracks" => uris.len(),
    );

    Ok(DailyMix {
        embed_url: embed_url(&playlist.id),
        id: playlist.id,
        name: playlist.name,
        url: playlist.external_urls.spotify,
        track_count: uris.len(),
    })
}
