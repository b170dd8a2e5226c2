diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        email -> Text,
        bio -> Text,
        image -> Nullable<Text>,
        password -> Text,
    }
}

diesel::table! {
    follows (id) {
        id -> Integer,
        following_id -> Integer,
        followed_by_id -> Integer,
    }
}

diesel::table! {
    articles (id) {
        id -> Integer,
        slug -> Text,
        title -> Text,
        description -> Text,
        body -> Text,
        author_id -> Integer,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    tags (id) {
        id -> Integer,
        article_id -> Integer,
        name -> Text,
    }
}

diesel::table! {
    favorites (id) {
        id -> Integer,
        article_id -> Integer,
        user_id -> Integer,
    }
}

diesel::table! {
    comments (id) {
        id -> Integer,
        author_id -> Integer,
        article_id -> Integer,
        body -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::joinable!(articles -> users (author_id));
diesel::joinable!(comments -> users (author_id));
diesel::joinable!(comments -> articles (article_id));
diesel::joinable!(tags -> articles (article_id));
diesel::joinable!(favorites -> articles (article_id));

diesel::allow_tables_to_appear_in_same_query!(users, follows, articles, tags, favorites, comments);
